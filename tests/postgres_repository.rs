//! SQL of the Postgres adapter against a real server.
//!
//! Run with `DATABASE_URL=postgres://... cargo test --test postgres_repository -- --ignored`;
//! each test gets a fresh database with the migrations applied.

use opensase_slips::domain::aggregates::{NewOrder, NewSlip, SlipStatus};
use opensase_slips::domain::value_objects::{CartId, Money, ProductId, Quantity, SlipId, UserId};
use opensase_slips::repository::{PgSlipRepository, RetryPolicy, SlipFilter, SlipRepository, SlipTransaction};
use sqlx::PgPool;

fn money(raw: &str) -> Money { Money::parse_positive(raw).unwrap() }

async fn product(pool: &PgPool, quantity: i32) -> ProductId {
    sqlx::query_scalar("INSERT INTO products (title, price, quantity) VALUES ('Rice', 100, $1) RETURNING id")
        .bind(quantity)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn slip(repo: &PgSlipRepository, user: i64, cart: i64, amount: &str, address: Option<&str>) -> SlipId {
    let mut tx = repo.begin().await.unwrap();
    let id = tx.insert_slip(&NewSlip {
        cart_id: CartId(cart), user_id: UserId(user), amount: money(amount),
        slip_path: "/uploads/slips/a.jpg".into(), shipping_address: address.map(str::to_string),
    }).await.unwrap();
    tx.commit().await.unwrap();
    id
}

fn repo(pool: PgPool) -> PgSlipRepository { PgSlipRepository::new(pool, RetryPolicy::none()) }

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn test_claim_flag_flips_once(pool: PgPool) {
    let repo = repo(pool);
    let id = slip(&repo, 1, 10, "500", None).await;

    assert!(repo.atomic_claim_deduction_flag(id).await.unwrap());
    assert!(!repo.atomic_claim_deduction_flag(id).await.unwrap());
    assert!(repo.find_slip(id).await.unwrap().unwrap().stock_deducted);
    assert!(!repo.atomic_claim_deduction_flag(SlipId(4040)).await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn test_decrement_clamps_and_counts_sold(pool: PgPool) {
    let id = product(&pool, 3).await;
    let repo = repo(pool.clone());

    let change = repo.deduct_product_stock(id, Quantity::new(2)).await.unwrap().unwrap();
    assert_eq!((change.requested, change.deducted, change.quantity_after), (2, 2, 1));
    let change = repo.deduct_product_stock(id, Quantity::new(5)).await.unwrap().unwrap();
    assert_eq!((change.requested, change.deducted, change.quantity_after), (5, 1, 0));

    let (quantity, sold): (i32, i64) = sqlx::query_as("SELECT quantity, sold FROM products WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!((quantity, sold), (0, 3));
    assert!(repo.deduct_product_stock(ProductId(4040), Quantity::new(1)).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn test_listing_falls_back_to_cart_address(pool: PgPool) {
    let repo = repo(pool);
    let plain = slip(&repo, 1, 10, "500", None).await;
    let own = slip(&repo, 1, 20, "80", Some("Own St")).await;
    let gone = slip(&repo, 2, 30, "40", None).await;
    repo.save_cart_address(UserId(9), CartId(10), "Cart St").await.unwrap();
    repo.set_status(own, SlipStatus::Rejected).await.unwrap();
    repo.soft_delete_slip(gone).await.unwrap();

    let all = repo.list_slips(SlipFilter::default()).await.unwrap();
    assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![own, plain]);
    assert_eq!(all[1].shipping_address.as_deref(), Some("Cart St"));
    assert_eq!(all[0].shipping_address.as_deref(), Some("Own St"));

    let rejected = repo.list_slips(SlipFilter { status: Some(SlipStatus::Rejected), user_id: None }).await.unwrap();
    assert_eq!(rejected.len(), 1);
    assert!(repo.list_slips(SlipFilter { status: None, user_id: Some(UserId(2)) }).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn test_mirror_order_lookup_matches_cart_and_amount(pool: PgPool) {
    let repo = repo(pool);
    let mut tx = repo.begin().await.unwrap();
    let order = tx.create_order(&NewOrder::mirror(UserId(1), CartId(10), money("500.00"))).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(repo.find_order_by_cart(UserId(1), CartId(10), money("500.004")).await.unwrap(), Some(order));
    assert_eq!(repo.find_order_by_cart(UserId(1), CartId(10), money("700")).await.unwrap(), None);
    assert_eq!(repo.find_order_by_cart(UserId(2), CartId(10), money("500")).await.unwrap(), None);
    assert_eq!(repo.find_order_by_amount(UserId(1), money("500")).await.unwrap(), None, "linked orders are not heuristic matches");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn test_totals_and_daily_sales(pool: PgPool) {
    let repo = repo(pool);
    let a = slip(&repo, 1, 10, "500", None).await;
    slip(&repo, 1, 20, "80", None).await;
    let deleted = slip(&repo, 1, 30, "999", None).await;
    repo.set_status(a, SlipStatus::Approved).await.unwrap();
    repo.set_status(deleted, SlipStatus::Approved).await.unwrap();
    repo.soft_delete_slip(deleted).await.unwrap();

    let totals = repo.slip_totals().await.unwrap();
    assert_eq!((totals.slips, totals.pending, totals.approved_revenue), (2, 1, money("500")));

    let today = chrono::Utc::now().date_naive();
    let days = repo.approved_sales_since(today).await.unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!((days[0].revenue, days[0].approved), (money("500"), 1));
}
