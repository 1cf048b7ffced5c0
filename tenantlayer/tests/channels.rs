mod common;

use bson::{Bson, doc};

use tenantlayer::{memory::InMemoryStore, prelude::*};

use common::{field, strings, tenant};

#[tokio::test]
async fn messages_come_back_in_publication_order() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;

    let chat = store.channel(&alice, "rooms/42/chat").unwrap();
    for text in ["one", "two", "three"] {
        chat.publish(doc! { "text": text }).await.unwrap();
    }
    store
        .channel(&alice, "rooms/43/chat")
        .unwrap()
        .publish(doc! { "text": "elsewhere" })
        .await
        .unwrap();

    let messages = chat.messages(None).await.unwrap();
    assert_eq!(strings(&messages, "text"), vec!["one", "two", "three"]);
    assert_eq!(strings(&messages, "channel"), vec!["rooms/42/chat"; 3]);

    let narrowed = chat.messages(Some(Filter::ne("text", "two"))).await.unwrap();
    assert_eq!(strings(&narrowed, "text"), vec!["one", "three"]);
}

#[tokio::test]
async fn channel_paths_are_exact() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;

    store
        .channel(&alice, "rooms")
        .unwrap()
        .publish(doc! { "text": "parent" })
        .await
        .unwrap();
    let child = store.channel(&alice, "/rooms/1/").unwrap();
    assert_eq!(child.path(), "rooms/1");
    assert!(child.messages(None).await.unwrap().is_empty());

    for path in ["", "rooms//1", " / "] {
        let err = store.channel(&alice, path).unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidQuery(_)), "{path:?}");
    }
}

#[tokio::test]
async fn channels_are_tenant_scoped() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let (bob, _) = tenant(&registry, "bob").await;

    let published = store
        .channel(&alice, "news")
        .unwrap()
        .publish(doc! { "text": "hi", "app_id": bob.tenant().as_str() })
        .await
        .unwrap();
    assert_eq!(field(&published, "app_id").as_str(), Some(alice.tenant().as_str()));

    assert!(store.channel(&bob, "news").unwrap().messages(None).await.unwrap().is_empty());

    let err = store
        .channel(&alice, "news")
        .unwrap()
        .messages(Some(Filter::eq("app_id", bob.tenant().as_str())))
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::ForbiddenFilter(_)));
}

#[tokio::test]
async fn key_values_upsert() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let keys = store.keys(&alice);

    assert_eq!(keys.get("theme").await.unwrap(), Bson::Null);

    let entry = keys.set("theme", Bson::from("dark")).await.unwrap();
    assert_eq!(field(&entry, "name").as_str(), Some("theme"));
    assert_eq!(keys.get("theme").await.unwrap(), Bson::from("dark"));

    keys.set("theme", Bson::from("light")).await.unwrap();
    assert_eq!(keys.get("theme").await.unwrap(), Bson::from("light"));

    keys.set("limits", Bson::Document(doc! { "max": 3 })).await.unwrap();
    assert_eq!(keys.get("limits").await.unwrap(), Bson::Document(doc! { "max": 3 }));

    // One entry per name
    let entries = store
        .backend()
        .query_documents(Query::default(), "__key_values")
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);

    assert!(matches!(
        keys.set("  ", Bson::Null).await.unwrap_err(),
        DocumentStoreError::InvalidQuery(_)
    ));
}

#[tokio::test]
async fn key_values_are_tenant_scoped() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let (bob, _) = tenant(&registry, "bob").await;

    store.keys(&alice).set("plan", Bson::from("pro")).await.unwrap();
    store.keys(&bob).set("plan", Bson::from("free")).await.unwrap();

    assert_eq!(store.keys(&alice).get("plan").await.unwrap(), Bson::from("pro"));
    assert_eq!(store.keys(&bob).get("plan").await.unwrap(), Bson::from("free"));
}

#[tokio::test]
async fn named_records_merge_on_repeated_names() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let (bob, _) = tenant(&registry, "bob").await;

    let configs = store.configs(&alice);
    configs.put(doc! { "name": "mail", "host": "smtp.local" }).await.unwrap();
    configs.put(doc! { "name": "mail", "port": 587 }).await.unwrap();

    let mail = configs.get("mail").await.unwrap().unwrap();
    assert_eq!(field(&mail, "host"), &Bson::from("smtp.local"));
    assert_eq!(configs.list().await.unwrap().len(), 1);

    assert!(store.configs(&bob).get("mail").await.unwrap().is_none());
    assert!(store.modules(&alice).list().await.unwrap().is_empty());

    for unnamed in [doc! { "host": "x" }, doc! { "name": " " }, doc! { "name": 3 }] {
        let err = configs.put(unnamed).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
    }
}

#[tokio::test]
async fn purging_a_tenant_removes_its_configs_and_modules() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let (bob, _) = tenant(&registry, "bob").await;

    store.configs(&alice).put(doc! { "name": "mail" }).await.unwrap();
    store.modules(&alice).put(doc! { "name": "auth" }).await.unwrap();
    store.modules(&bob).put(doc! { "name": "auth" }).await.unwrap();

    assert_eq!(store.purge_tenant(alice.tenant()).await.unwrap(), 2);
    assert!(store.configs(&alice).list().await.unwrap().is_empty());
    assert!(store.modules(&alice).list().await.unwrap().is_empty());
    assert_eq!(store.modules(&bob).list().await.unwrap().len(), 1);
}
