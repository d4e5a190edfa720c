//! Cached queries and cache-invalidating commands through the application mediator.

mod common;

use newsletter::application::articles::{FetchArticle, FetchArticles, FetchComments};
use newsletter::application::context::RequestContext;
use newsletter::application::error::AppError;
use newsletter::application::pipeline::CachedQuery;
use newsletter::application::subscribers::{FetchSubscribersCount, SubscribeToNewsletter};

use common::{caller, harness};

#[tokio::test]
async fn repeated_article_fetch_hits_the_cache() {
    let h = harness();
    let ctx = RequestContext::anonymous();

    let first = h
        .app
        .send(FetchArticle { id: 2 }, &ctx)
        .await
        .expect("first fetch")
        .expect("seeded article");
    let second = h
        .app
        .send(FetchArticle { id: 2 }, &ctx)
        .await
        .expect("second fetch")
        .expect("cached article");

    assert_eq!(first, second);
    assert_eq!(h.repos.calls("find_article"), 1);
    assert!(
        h.app
            .cache()
            .exists(&FetchArticle { id: 2 }.cache_key())
            .await
            .expect("exists")
    );
}

#[tokio::test]
async fn missing_article_is_not_cached() {
    let h = harness();
    let ctx = RequestContext::anonymous();

    for _ in 0..2 {
        let article = h
            .app
            .send(FetchArticle { id: 404 }, &ctx)
            .await
            .expect("fetch");
        assert!(article.is_none());
    }

    assert_eq!(h.repos.calls("find_article"), 2);
}

#[tokio::test]
async fn article_list_pages_are_cached_independently() {
    let h = harness();
    let ctx = RequestContext::anonymous();

    let page_one = h
        .app
        .send(FetchArticles { page: 1, page_size: 2 }, &ctx)
        .await
        .expect("page one");
    let page_two = h
        .app
        .send(FetchArticles { page: 2, page_size: 2 }, &ctx)
        .await
        .expect("page two");
    h.app
        .send(FetchArticles { page: 1, page_size: 2 }, &ctx)
        .await
        .expect("page one again");

    assert_eq!(page_one.len(), 2);
    assert_eq!(page_two.len(), 1);
    assert!(page_one.iter().all(|summary| summary.articles_count == 3));
    assert_eq!(h.repos.calls("list_articles"), 2);
}

#[tokio::test]
async fn failed_queries_are_not_cached() {
    let h = harness();
    let ctx = RequestContext::anonymous();
    let query = FetchComments {
        article_id: 1,
        page: 1,
        page_size: 0,
    };

    let err = h.app.send(query.clone(), &ctx).await.expect_err("invalid size");
    assert!(matches!(err, AppError::Validation { .. }));
    assert_eq!(err.code(), "FetchComments.PageSize");
    assert!(!h.app.cache().exists(&query.cache_key()).await.expect("exists"));
    assert_eq!(h.repos.calls("list_comments"), 0);
}

#[tokio::test]
async fn subscribe_invalidates_the_cached_count() {
    let h = harness();
    let ctx = caller("203.0.113.7");
    let mut dispatcher = h.app.dispatcher().expect("dispatcher");

    let before = h
        .app
        .send(FetchSubscribersCount, &ctx)
        .await
        .expect("count");
    assert_eq!(before.count, 0);
    let key = FetchSubscribersCount.cache_key();
    assert!(h.app.cache().exists(&key).await.expect("exists"));

    h.app
        .send(
            SubscribeToNewsletter {
                email: "Reader@Example.com".to_string(),
            },
            &ctx,
        )
        .await
        .expect("subscribe");
    assert!(!h.app.cache().exists(&key).await.expect("exists"));

    assert_eq!(dispatcher.dispatch_pending().await, 1);

    let after = h
        .app
        .send(FetchSubscribersCount, &ctx)
        .await
        .expect("count");
    assert_eq!(after.count, 1);
    assert_eq!(h.repos.calls("count_subscribers"), 2);
}

#[tokio::test]
async fn rejected_command_still_invalidates_its_keys() {
    let h = harness();
    let ctx = caller("203.0.113.7");

    h.app
        .send(FetchSubscribersCount, &ctx)
        .await
        .expect("count");

    let err = h
        .app
        .send(
            SubscribeToNewsletter {
                email: "   ".to_string(),
            },
            &ctx,
        )
        .await
        .expect_err("blank email");
    assert!(matches!(err, AppError::Validation { .. }));
    assert!(
        !h.app
            .cache()
            .exists(&FetchSubscribersCount.cache_key())
            .await
            .expect("exists")
    );
}
