mod common;

use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;

use ramen_review::auth::Actor;
use ramen_review::server::{build_router, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};

struct Served {
    base: String,
    client: reqwest::Client,
    env: common::TestEnv,
}

async fn serve() -> Served {
    let env = common::setup().await;

    // The router needs its own engine; share the database and storage.
    let engine = ramen_review::engine::Engine::with_storage(
        env.engine.pool.clone(),
        env.storage.clone(),
        &env.config,
    );
    let app = build_router(Arc::new(engine), &env.config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Served {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        env,
    }
}

fn as_actor(req: reqwest::RequestBuilder, actor: &Actor) -> reqwest::RequestBuilder {
    req.header(ACTOR_ID_HEADER, actor.id.to_string())
        .header(ACTOR_ROLE_HEADER, actor.role.as_str())
}

fn photo_part(name: &str) -> Part {
    Part::bytes(vec![0xFF, 0xD8, 0xFF, 0xE0, 9, 9])
        .file_name(name.to_string())
        .mime_str("image/jpeg")
        .unwrap()
}

async fn create_review(s: &Served, actor: &Actor, rating: &str, content: &str) -> Value {
    let form = Form::new()
        .text("rating", rating.to_string())
        .text("content", content.to_string())
        .part("photos", photo_part("bowl.jpg"));
    let resp = as_actor(
        s.client
            .post(format!("{}/api/shops/{}/reviews", s.base, s.env.shop.id)),
        actor,
    )
    .multipart(form)
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_health() {
    let s = serve().await;
    let body: Value = s
        .client
        .get(format!("{}/health", s.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_list_and_fetch_media() {
    let s = serve().await;
    let created = create_review(&s, &s.env.alice, "5", "best broth in town").await;

    assert_eq!(created["review"]["rating"], 5);
    assert_eq!(created["review"]["user"]["username"], "alice");
    assert_eq!(created["uploads"]["accepted"].as_array().unwrap().len(), 1);
    let url = created["review"]["media"][0]["url"].as_str().unwrap().to_string();

    let page: Value = s
        .client
        .get(format!(
            "{}/api/shops/{}/reviews?page=0&size=5&sortBy=rating&sortDir=desc",
            s.base, s.env.shop.id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["totalElements"], 1);
    assert_eq!(page["content"][0]["content"], "best broth in town");

    let file = s
        .client
        .get(format!("{}/media/{}", s.base, url))
        .send()
        .await
        .unwrap();
    assert_eq!(file.status(), StatusCode::OK);
    assert_eq!(file.headers()["content-type"], "image/jpeg");
    assert_eq!(file.bytes().await.unwrap().as_ref(), &[0xFF, 0xD8, 0xFF, 0xE0, 9, 9]);

    let shop: Value = s
        .client
        .get(format!("{}/api/shops/{}", s.base, s.env.shop.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(shop["reviewCount"], 1);
    assert_eq!(shop["weightedRating"], "3.7500000");
}

#[tokio::test]
async fn test_error_contract() {
    let s = serve().await;

    let resp = s
        .client
        .post(format!("{}/api/shops/{}/reviews", s.base, s.env.shop.id))
        .multipart(Form::new().text("rating", "4").text("content", "anon"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = as_actor(
        s.client.post(format!("{}/api/shops/9999/reviews", s.base)),
        &s.env.alice,
    )
    .multipart(Form::new().text("rating", "4").text("content", "ghost"))
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = as_actor(
        s.client
            .post(format!("{}/api/shops/{}/reviews", s.base, s.env.shop.id)),
        &s.env.alice,
    )
    .multipart(Form::new().text("rating", "9").text("content", "too good"))
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = as_actor(
        s.client
            .post(format!("{}/api/shops/{}/reviews", s.base, s.env.shop.id)),
        &s.env.owner,
    )
    .multipart(Form::new().text("rating", "5").text("content", "my own shop"))
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");

    let resp = s
        .client
        .get(format!(
            "{}/api/shops/{}/reviews?sortBy=likes",
            s.base, s.env.shop.id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_reply_and_delete() {
    let s = serve().await;
    let created = create_review(&s, &s.env.alice, "4", "rich").await;
    let id = created["review"]["id"].as_i64().unwrap();

    let resp = as_actor(
        s.client.put(format!("{}/api/reviews/{}", s.base, id)),
        &s.env.bob,
    )
    .json(&serde_json::json!({ "content": "mine now" }))
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let updated: Value = as_actor(
        s.client.put(format!("{}/api/reviews/{}", s.base, id)),
        &s.env.alice,
    )
    .json(&serde_json::json!({ "rating": 2 }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(updated["rating"], 2);

    let form = Form::new()
        .text("content", "sorry to hear")
        .text("parentReviewId", id.to_string());
    let resp = as_actor(
        s.client
            .post(format!("{}/api/shops/{}/reviews", s.base, s.env.shop.id)),
        &s.env.owner,
    )
    .multipart(form)
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let replies: Value = s
        .client
        .get(format!("{}/api/reviews/{}/replies", s.base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(replies.as_array().unwrap().len(), 1);

    let summary: Value = as_actor(
        s.client.delete(format!("{}/api/reviews/{}", s.base, id)),
        &s.env.admin,
    )
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(summary["reviewsDeleted"], 2);
    assert_eq!(summary["media"]["rowsDeleted"], 1);

    let resp = s
        .client
        .get(format!("{}/api/reviews/{}/replies", s.base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_recompute_requires_admin() {
    let s = serve().await;
    create_review(&s, &s.env.alice, "5", "great").await;

    let url = format!("{}/api/shops/{}/rating/recompute", s.base, s.env.shop.id);
    let resp = as_actor(s.client.post(&url), &s.env.owner).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let summary: Value = as_actor(s.client.post(&url), &s.env.admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["reviewCount"], 1);
    assert_eq!(summary["averageRating"], "5.00");
}

#[tokio::test]
async fn test_top_shops_and_user_reviews() {
    let s = serve().await;
    let carol = common::add_user(&s.env.engine, "carol", ramen_review::auth::Role::User).await;
    for actor in [&s.env.alice, &s.env.bob, &carol] {
        create_review(&s, actor, "4", "solid").await;
    }

    let top: Value = s
        .client
        .get(format!("{}/api/shops/top?limit=5", s.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(top.as_array().unwrap().len(), 1);
    assert_eq!(top[0]["name"], "Menya Kaijin");

    let mine: Value = s
        .client
        .get(format!("{}/api/users/{}/reviews", s.base, s.env.alice.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mine["totalElements"], 1);
}

#[tokio::test]
async fn test_shop_listing_editing_and_user_deletion() {
    let s = serve().await;
    create_review(&s, &s.env.bob, "1", "too salty").await;
    create_review(&s, &s.env.alice, "5", "great").await;

    let listed: Value = s
        .client
        .get(format!("{}/api/shops?city=shinjuku&size=5", s.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["totalElements"], 1);
    assert_eq!(listed["content"][0]["name"], "Menya Kaijin");

    let resp = s
        .client
        .get(format!("{}/api/shops?page=4611686018427387903&size=4", s.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let url = format!("{}/api/shops/{}", s.base, s.env.shop.id);
    let resp = as_actor(s.client.put(&url), &s.env.alice)
        .json(&serde_json::json!({ "name": "mine" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let shop: Value = as_actor(s.client.put(&url), &s.env.owner)
        .json(&serde_json::json!({ "address": "Ebisu, Tokyo" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(shop["address"], "Ebisu, Tokyo");

    let user_url = format!("{}/api/users/{}", s.base, s.env.bob.id);
    let resp = as_actor(s.client.delete(&user_url), &s.env.owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let summary: Value = as_actor(s.client.delete(&user_url), &s.env.admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["reviewsDeleted"], 1);
    assert_eq!(summary["media"]["rowsDeleted"], 1);

    let shop: Value = s.client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(shop["reviewCount"], 1);
    assert_eq!(shop["averageRating"], "5.00");
    assert_eq!(shop["weightedRating"], "3.7500000");
}
