mod common;

use std::time::Duration;

use http::StatusCode;

use storedav::{DavHandler, Depth, Store};

use common::req;

const EXCLUSIVE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:alice@example.com</D:href></D:owner>
</D:lockinfo>"#;

const SHARED: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:shared/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner>bob</D:owner>
</D:lockinfo>"#;

fn if_header(token: &str) -> String {
    format!("(<opaquelocktoken:{}>)", token)
}

#[tokio::test]
async fn test_lock_unlock_round_trip() {
    let dh = DavHandler::builder(Store::Mem).build();
    req(&dh, "PUT", "/doc.txt", &[], "v1").await;

    let r = req(&dh, "LOCK", "/doc.txt", &[("timeout", "Second-600")], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.header("content-type").unwrap().starts_with("application/xml"));
    assert!(r.body.contains("mailto:alice@example.com"));
    assert!(r.body.contains("<D:exclusive"));
    let token = r.lock_token();
    assert!(r.body.contains(&format!("opaquelocktoken:{}", token)));

    let lo = dh.locks().get_locked_object_by_id(&token).unwrap();
    assert_eq!(lo.path(), "/doc.txt");
    assert!(lo.is_exclusive());
    assert_eq!(lo.depth(), Depth::Infinity);

    // writers without the token are turned away.
    let r = req(&dh, "PUT", "/doc.txt", &[], "v2").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    let ms = r.multistatus();
    assert_eq!(ms.len(), 1);
    assert_eq!(ms[0].0, "/doc.txt");
    assert!(ms[0].1.contains("423"));
    let r = req(&dh, "DELETE", "/doc.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(req(&dh, "GET", "/doc.txt", &[], "").await.body, "v1");

    // with the token they get through.
    let ifh = if_header(&token);
    let r = req(&dh, "PUT", "/doc.txt", &[("if", ifh.as_str())], "v2").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let lt = format!("<opaquelocktoken:{}>", token);
    let r = req(&dh, "UNLOCK", "/doc.txt", &[("lock-token", lt.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert!(dh.locks().get_locked_object_by_id(&token).is_none());

    let r = req(&dh, "UNLOCK", "/doc.txt", &[("lock-token", lt.as_str())], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let r = req(&dh, "UNLOCK", "/doc.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let r = req(&dh, "PUT", "/doc.txt", &[], "v3").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_lock_conflicts() {
    let dh = DavHandler::builder(Store::Mem).build();
    req(&dh, "MKCOL", "/dir", &[], "").await;
    req(&dh, "PUT", "/dir/f.txt", &[], "f").await;

    let r = req(&dh, "LOCK", "/dir", &[], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = r.lock_token();

    // depth infinity covers the folder's members.
    let r = req(&dh, "LOCK", "/dir/f.txt", &[("depth", "0")], SHARED).await;
    assert_eq!(r.status, StatusCode::LOCKED);
    let r = req(&dh, "PUT", "/dir/new.txt", &[], "n").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    let r = req(&dh, "MOVE", "/dir/f.txt", &[("destination", "/g.txt")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);

    // the same owner can not take the lock twice.
    let r = req(&dh, "LOCK", "/dir", &[], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let r = req(&dh, "LOCK", "/dir", &[("depth", "1")], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    // refresh: no body, token in If:.
    let ifh = if_header(&token);
    let r = req(&dh, "LOCK", "/dir", &[("if", ifh.as_str()), ("timeout", "Second-60")], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.lock_token(), token);
    let r = req(&dh, "LOCK", "/dir", &[("if", "(<opaquelocktoken:nope>)")], "").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    // no body, no token.
    let r = req(&dh, "LOCK", "/dir", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_shared_locks() {
    let dh = DavHandler::builder(Store::Mem).build();
    req(&dh, "PUT", "/s.txt", &[], "s").await;

    let r = req(&dh, "LOCK", "/s.txt", &[], SHARED).await;
    assert_eq!(r.status, StatusCode::OK);
    let other = SHARED.replace("bob", "carol");
    let r = req(&dh, "LOCK", "/s.txt", &[], &other).await;
    assert_eq!(r.status, StatusCode::OK);
    let r = req(&dh, "LOCK", "/s.txt", &[], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::LOCKED);

    assert!(r.header("lock-token").is_none());

    // shared locks do not keep writers out.
    let r = req(&dh, "PUT", "/s.txt", &[], "t").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let r = req(&dh, "PROPFIND", "/s.txt", &[("depth", "0")], "").await;
    assert_eq!(r.body.matches("<D:activelock").count(), 2);
}

#[tokio::test]
async fn test_null_resource_promoted_by_put() {
    let dh = DavHandler::builder(Store::Mem).build();

    let r = req(&dh, "LOCK", "/new.txt", &[], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let token = r.lock_token();

    // a placeholder exists, but has no content.
    let r = req(&dh, "GET", "/new.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
    let r = req(&dh, "OPTIONS", "/new.txt", &[], "").await;
    assert!(r.header("allow").unwrap().contains("UNLOCK"));

    let r = req(&dh, "PUT", "/new.txt", &[("if", "(<opaquelocktoken:wrong>)")], "x").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);

    let ifh = if_header(&token);
    let r = req(&dh, "PUT", "/new.txt", &[("if", ifh.as_str())], "content").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert!(dh.locks().get_locked_object_by_id(&token).is_none());
    assert_eq!(req(&dh, "GET", "/new.txt", &[], "").await.body, "content");
}

#[tokio::test]
async fn test_null_resource_promoted_by_mkcol() {
    let dh = DavHandler::builder(Store::Mem).build();

    let r = req(&dh, "LOCK", "/newdir", &[], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let token = r.lock_token();

    let r = req(&dh, "MKCOL", "/newdir", &[], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);

    let ifh = if_header(&token);
    let r = req(&dh, "MKCOL", "/newdir", &[("if", ifh.as_str())], "").await;
    assert_eq!(r.status, StatusCode::CREATED);

    let r = req(&dh, "PROPFIND", "/newdir", &[("depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("<D:collection"));
}

#[tokio::test]
async fn test_unlock_removes_null_resource() {
    let dh = DavHandler::builder(Store::Mem).build();

    let r = req(&dh, "LOCK", "/ghost", &[], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let lt = format!("<opaquelocktoken:{}>", r.lock_token());

    let r = req(&dh, "UNLOCK", "/ghost", &[("lock-token", lt.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = req(&dh, "PROPFIND", "/ghost", &[("depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_copy_onto_locked_destination() {
    let dh = DavHandler::builder(Store::Mem).build();
    req(&dh, "PUT", "/a.txt", &[], "a").await;
    req(&dh, "PUT", "/b.txt", &[], "b").await;

    let r = req(&dh, "LOCK", "/b.txt", &[], EXCLUSIVE).await;
    let token = r.lock_token();

    let r = req(&dh, "COPY", "/a.txt", &[("destination", "/b.txt")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(req(&dh, "GET", "/b.txt", &[], "").await.body, "b");

    let ifh = if_header(&token);
    let r = req(
        &dh,
        "COPY",
        "/a.txt",
        &[("destination", "/b.txt"), ("if", ifh.as_str())],
        "",
    )
    .await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert_eq!(req(&dh, "GET", "/b.txt", &[], "").await.body, "a");
}

#[tokio::test]
async fn test_busy_path() {
    let dh = DavHandler::builder(Store::Mem).build();
    req(&dh, "PUT", "/busy.txt", &[], "old").await;

    // another request is in its critical section on the path.
    let guard = dh
        .locks()
        .temp_lock("/busy.txt", "other-request".to_string(), true, Depth::Zero)
        .unwrap()
        .unwrap();
    let r = req(&dh, "PUT", "/busy.txt", &[], "new").await;
    assert_eq!(r.status, StatusCode::LOCKED);
    let r = req(&dh, "GET", "/busy.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    drop(guard);
    let r = req(&dh, "PUT", "/busy.txt", &[], "new").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert!(dh.locks().get_temp_locked_object_by_path("/busy.txt").is_none());
}

#[tokio::test]
async fn test_null_resource_after_lock_expiry() {
    let dh = DavHandler::builder(Store::Mem).build();

    let r = req(&dh, "LOCK", "/n.txt", &[("timeout", "Second-1")], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = req(&dh, "LOCK", "/m", &[("timeout", "Second-1")], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::CREATED);
    tokio::time::sleep(Duration::from_millis(1200)).await;

    // nobody holds the placeholders any more, so no token is needed.
    let r = req(&dh, "PUT", "/n.txt", &[], "late").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(req(&dh, "GET", "/n.txt", &[], "").await.body, "late");

    let r = req(&dh, "MKCOL", "/m", &[], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = req(&dh, "PROPFIND", "/m", &[("depth", "0")], "").await;
    assert!(r.body.contains("<D:collection"));
}

#[tokio::test]
async fn test_unlock_with_token_of_other_path() {
    let dh = DavHandler::builder(Store::Mem).build();
    req(&dh, "PUT", "/a.txt", &[], "a").await;

    let r = req(&dh, "LOCK", "/a.txt", &[], EXCLUSIVE).await;
    let alice = r.lock_token();
    let bob_lock = EXCLUSIVE.replace("mailto:alice@example.com", "mailto:bob@example.com");
    let r = req(&dh, "LOCK", "/n.txt", &[], &bob_lock).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let bob = r.lock_token();

    let lt = format!("<opaquelocktoken:{}>", alice);
    let r = req(&dh, "UNLOCK", "/n.txt", &[("lock-token", lt.as_str())], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);

    // both locks and bob's placeholder are untouched.
    assert!(dh.locks().get_locked_object_by_id(&alice).is_some());
    assert!(dh.locks().get_locked_object_by_id(&bob).is_some());
    let r = req(&dh, "PROPFIND", "/n.txt", &[("depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn test_unlock_below_depth_lock() {
    let dh = DavHandler::builder(Store::Mem).build();
    req(&dh, "MKCOL", "/dir", &[], "").await;
    req(&dh, "PUT", "/dir/f.txt", &[], "f").await;

    let r = req(&dh, "LOCK", "/dir", &[], EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = r.lock_token();

    // an infinite lock on the folder covers its members.
    let lt = format!("<opaquelocktoken:{}>", token);
    let r = req(&dh, "UNLOCK", "/dir/f.txt", &[("lock-token", lt.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert!(dh.locks().get_locked_object_by_id(&token).is_none());
    assert_eq!(req(&dh, "GET", "/dir/f.txt", &[], "").await.body, "f");

    let r = req(&dh, "LOCK", "/dir", &[("depth", "0")], EXCLUSIVE).await;
    let token = r.lock_token();
    let lt = format!("<opaquelocktoken:{}>", token);
    let r = req(&dh, "UNLOCK", "/dir/f.txt", &[("lock-token", lt.as_str())], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_locks_go_with_removed_resources() {
    let dh = DavHandler::builder(Store::Mem).build();
    req(&dh, "MKCOL", "/dir", &[], "").await;
    req(&dh, "PUT", "/dir/f.txt", &[], "f").await;
    req(&dh, "PUT", "/m.txt", &[], "m").await;

    let r = req(&dh, "LOCK", "/dir/f.txt", &[], EXCLUSIVE).await;
    let token = r.lock_token();
    let ifh = if_header(&token);
    let r = req(&dh, "DELETE", "/dir", &[("if", ifh.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert!(dh.locks().get_locked_object_by_id(&token).is_none());
    req(&dh, "MKCOL", "/dir", &[], "").await;
    let r = req(&dh, "PUT", "/dir/f.txt", &[], "again").await;
    assert_eq!(r.status, StatusCode::CREATED);

    let r = req(&dh, "LOCK", "/m.txt", &[], EXCLUSIVE).await;
    let token = r.lock_token();
    let ifh = if_header(&token);
    let r = req(
        &dh,
        "MOVE",
        "/m.txt",
        &[("destination", "/moved.txt"), ("if", ifh.as_str())],
        "",
    )
    .await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert!(dh.locks().get_locked_object_by_id(&token).is_none());
    let r = req(&dh, "PUT", "/m.txt", &[], "new").await;
    assert_eq!(r.status, StatusCode::CREATED);
}
