//! Origin adapter tests against PostgreSQL.
//!
//! - Marked `#[ignore]`; run with `DATABASE_URL` pointing at a scratch server
//!   and `cargo test -- --ignored`.
//! - Each test gets a fresh database with `./migrations` applied.

use std::time::Duration;

use newsdesk::application::origin::{ListingQuery, OriginError, OriginStore, SaveTransition};
use newsdesk::domain::entities::ListingSort;
use newsdesk::infra::db::PostgresOrigin;
use sqlx::PgPool;

async fn seed(pool: &PgPool) {
    sqlx::query(
        "INSERT INTO categories (slug, name, parent_slug, position) VALUES \
         ('sports', 'Sports', NULL, 0), ('football', 'Football', 'sports', 0)",
    )
    .execute(pool)
    .await
    .expect("categories");

    sqlx::query(
        "INSERT INTO articles (id, slug, title, category_slug, published_at, view_count) VALUES \
         ('art-1', 'late-winner', 'Late winner', 'football', '2024-05-01T10:00:00Z', 50), \
         ('art-2', 'transfer-window', 'Transfer window', 'football', '2024-05-01T12:00:00Z', 10)",
    )
    .execute(pool)
    .await
    .expect("articles");

    sqlx::query(
        "INSERT INTO article_views (article_id) \
         SELECT 'art-1' FROM generate_series(1, 3) \
         UNION ALL SELECT 'art-2'",
    )
    .execute(pool)
    .await
    .expect("views");
}

fn origin(pool: PgPool) -> PostgresOrigin {
    PostgresOrigin::new(pool, Duration::from_secs(2))
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn reads_articles_listings_and_tree(pool: PgPool) {
    seed(&pool).await;
    let origin = origin(pool);

    let article = origin.article("art-1").await.expect("article");
    assert_eq!(article.category, "football");

    let page = origin
        .list_articles(&ListingQuery {
            category: "football".to_string(),
            page: 1,
            page_size: 1,
            sort: ListingSort::Latest,
        })
        .await
        .expect("listing");
    assert_eq!(page.items[0].id, "art-2");
    assert!(page.has_more);

    let tree = origin.category_tree().await.expect("tree");
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].children[0].slug, "football");

    let related = origin.related_articles("art-1", 5).await.expect("related");
    assert_eq!(related.len(), 1);

    let top = origin.top_viewed(24, 1).await.expect("top");
    assert_eq!(top[0].resource_id, "art-1");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn missing_rows_are_definitive(pool: PgPool) {
    seed(&pool).await;
    let origin = origin(pool);

    let err = origin.article("art-404").await.expect_err("missing");
    assert!(matches!(err, OriginError::NotFound { .. }));
    assert!(err.is_definitive());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn saved_flag_and_counter_commit_together(pool: PgPool) {
    seed(&pool).await;
    let origin = origin(pool.clone());

    let noop = origin
        .apply_saved_state("u-9", "art-1", false)
        .await
        .expect("unsave while unsaved");
    assert_eq!(
        noop,
        SaveTransition {
            changed: false,
            save_count: 0
        }
    );

    let saved = origin
        .apply_saved_state("u-9", "art-1", true)
        .await
        .expect("save");
    assert!(saved.changed);
    assert_eq!(saved.save_count, 1);
    assert!(origin.saved_state("u-9", "art-1").await.expect("state"));

    let again = origin
        .apply_saved_state("u-9", "art-1", true)
        .await
        .expect("save again");
    assert!(!again.changed);
    assert_eq!(again.save_count, 1);

    let unsaved = origin
        .apply_saved_state("u-9", "art-1", false)
        .await
        .expect("unsave");
    assert!(unsaved.changed);
    assert_eq!(unsaved.save_count, 0);
    assert!(!origin.saved_state("u-9", "art-1").await.expect("state"));

    let err = origin
        .apply_saved_state("u-9", "art-404", true)
        .await
        .expect_err("missing article");
    assert!(matches!(err, OriginError::NotFound { .. }));
    let orphans: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM saved_articles WHERE article_id = 'art-404'")
            .fetch_one(&pool)
            .await
            .expect("count");
    assert_eq!(orphans, 0);
    origin.ping().await.expect("ping");
}
