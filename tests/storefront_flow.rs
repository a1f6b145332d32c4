mod common;

use common::{NewCode, create_code, create_product, unique};
use peptide_storefront_api::{
    db::DbPool,
    dto::{
        auth::ConvertGuestRequest,
        cart::CartLine,
        discounts::UpdateDiscountRequest,
        orders::{CaptureRequest, GuestOrderLookupQuery, ShippingDetails},
    },
    entity::{
        affiliate_commissions::{Column as CommissionCol, Entity as Commissions},
        discount_codes::Entity as DiscountCodes,
        orders::{Column as OrderCol, Entity as Orders},
        products::Entity as Products,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::CommissionStatus,
    paypal::{CapturedPayment, PaymentGateway, PayPalError},
    services::{checkout_service, commission_service, discount_service, guest_service, order_service},
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

/// Reports every capture as completed for a fixed amount.
struct FakeGateway {
    amount_cents: i64,
}

impl PaymentGateway for FakeGateway {
    async fn capture(&self, paypal_order_id: &str) -> Result<CapturedPayment, PayPalError> {
        Ok(CapturedPayment {
            paypal_order_id: paypal_order_id.to_string(),
            capture_id: format!("CAP-{paypal_order_id}"),
            amount_cents: self.amount_cents,
            currency: "USD".into(),
        })
    }
}

fn shipping() -> ShippingDetails {
    ShippingDetails {
        name: "Dana Guest".into(),
        phone: Some("555-0100".into()),
        address: "1 Lab Way, Springfield".into(),
    }
}

fn guest_capture(product_id: uuid::Uuid, quantity: i32, code: Option<String>, email: &str) -> CaptureRequest {
    CaptureRequest {
        paypal_order_id: unique("PAYPAL-"),
        items: Some(vec![CartLine {
            product_id,
            quantity,
        }]),
        discount_code: code,
        email: Some(email.to_string()),
        shipping: shipping(),
    }
}

#[tokio::test]
async fn guest_checkout_with_affiliate_code_then_account_conversion() -> anyhow::Result<()> {
    let Some(state) = common::db_state().await? else {
        return Ok(());
    };

    let product = create_product(&state, 5_000, 10).await?;
    let affiliate_email = format!("{}@example.com", unique("partner"));
    let code = create_code(
        &state,
        NewCode {
            percent: 15,
            max_uses: None,
            affiliate: Some((affiliate_email, Decimal::from(10))),
        },
    )
    .await?;
    let guest_email = format!("{}@example.com", unique("guest"));

    // 2 x $50.00 = $100.00, 15% off leaves $85.00.
    let gateway = FakeGateway { amount_cents: 8_500 };
    let request = guest_capture(product.id, 2, Some(code.code.to_lowercase()), &guest_email);
    let replay = request.clone();
    let placed = checkout_service::place_order(&state, &gateway, None, request).await?;

    assert_eq!(placed.order.subtotal, 10_000);
    assert_eq!(placed.order.discount_amount, 1_500);
    assert_eq!(placed.order.total_amount, 8_500);
    assert_eq!(placed.order.payment_status, "paid");
    assert_eq!(placed.order.user_id, None);
    assert_eq!(placed.items.len(), 1);

    let stock = Products::find_by_id(product.id)
        .one(&state.orm)
        .await?
        .expect("product")
        .stock;
    assert_eq!(stock, 8);

    let uses = DiscountCodes::find_by_id(code.id)
        .one(&state.orm)
        .await?
        .expect("code")
        .current_uses;
    assert_eq!(uses, 1);

    let commission = Commissions::find()
        .filter(CommissionCol::OrderId.eq(placed.order.id))
        .one(&state.orm)
        .await?
        .expect("commission recorded");
    assert_eq!(commission.order_total, 8_500);
    assert_eq!(commission.commission_amount, 850);
    assert_eq!(commission.status, CommissionStatus::Pending.as_str());

    // The same PayPal order cannot be recorded twice.
    let err = checkout_service::place_order(&state, &gateway, None, replay)
        .await
        .expect_err("duplicate capture");
    assert!(matches!(err, AppError::Conflict(_)));

    // Guest lookup is case-insensitive on the email.
    let found = order_service::lookup_guest_order(
        &state,
        GuestOrderLookupQuery {
            order_number: placed.order.order_number.clone(),
            email: guest_email.to_uppercase(),
        },
    )
    .await?;
    assert_eq!(found.data.expect("order").order.id, placed.order.id);

    let converted = guest_service::convert_guest_to_account(
        &state,
        ConvertGuestRequest {
            email: guest_email.clone(),
            password: "correct-horse".into(),
            order_number: Some(placed.order.order_number.clone()),
        },
    )
    .await?
    .data
    .expect("converted");
    assert_eq!(converted.linked_orders, 1);
    assert_eq!(converted.user.full_name.as_deref(), Some("Dana Guest"));
    assert!(converted.token.starts_with("Bearer "));

    let owner = Orders::find_by_id(placed.order.id)
        .one(&state.orm)
        .await?
        .expect("order")
        .user_id;
    assert_eq!(owner, Some(converted.user.id));

    let again = guest_service::convert_guest_to_account(
        &state,
        ConvertGuestRequest {
            email: guest_email.to_uppercase(),
            password: "another-password".into(),
            order_number: None,
        },
    )
    .await
    .expect_err("email already registered");
    assert!(matches!(again, AppError::Conflict(_)));
    Ok(())
}

#[tokio::test]
async fn mismatched_capture_keeps_the_order_on_hold() -> anyhow::Result<()> {
    let Some(state) = common::db_state().await? else {
        return Ok(());
    };

    let product = create_product(&state, 2_000, 5).await?;
    let code = create_code(
        &state,
        NewCode {
            percent: 10,
            max_uses: Some(1),
            affiliate: None,
        },
    )
    .await?;
    let guest_email = format!("{}@example.com", unique("guest"));

    // PayPal captured $15.00 against an $18.00 order.
    let gateway = FakeGateway { amount_cents: 1_500 };
    let request = guest_capture(product.id, 1, Some(code.code.clone()), &guest_email);
    let paypal_order_id = request.paypal_order_id.clone();
    let placed = checkout_service::place_order(&state, &gateway, None, request).await?;

    assert_eq!(placed.order.total_amount, 1_800);
    assert_eq!(placed.order.status, checkout_service::ORDER_STATUS_ON_HOLD);
    assert_eq!(placed.order.payment_status, checkout_service::PAYMENT_AMOUNT_MISMATCH);
    assert_eq!(
        placed.order.capture_id.as_deref(),
        Some(format!("CAP-{paypal_order_id}").as_str())
    );

    let stored = Orders::find()
        .filter(OrderCol::PaypalOrderId.eq(paypal_order_id))
        .one(&state.orm)
        .await?
        .expect("captured order is stored");
    assert_eq!(stored.id, placed.order.id);
    assert_eq!(stored.payment_status, "amount_mismatch");

    let code_after = DiscountCodes::find_by_id(code.id)
        .one(&state.orm)
        .await?
        .expect("code");
    assert_eq!(code_after.current_uses, 1);

    let stock = Products::find_by_id(product.id)
        .one(&state.orm)
        .await?
        .expect("product")
        .stock;
    assert_eq!(stock, 4);
    Ok(())
}

/// Takes the PayPal order id for an existing order while the capture is in
/// flight, so the checkout's own write hits the unique index.
struct ClaimingGateway {
    pool: DbPool,
    claimed_by: uuid::Uuid,
}

impl PaymentGateway for ClaimingGateway {
    async fn capture(&self, paypal_order_id: &str) -> Result<CapturedPayment, PayPalError> {
        sqlx::query("UPDATE orders SET paypal_order_id = $1 WHERE id = $2")
            .bind(paypal_order_id)
            .bind(self.claimed_by)
            .execute(&self.pool)
            .await
            .map_err(|e| PayPalError::Parse(e.to_string()))?;
        Ok(CapturedPayment {
            paypal_order_id: paypal_order_id.to_string(),
            capture_id: format!("CAP-{paypal_order_id}"),
            amount_cents: 3_000,
            currency: "USD".into(),
        })
    }
}

#[tokio::test]
async fn capture_that_cannot_be_saved_is_audited() -> anyhow::Result<()> {
    let Some(state) = common::db_state().await? else {
        return Ok(());
    };

    let product = create_product(&state, 3_000, 5).await?;
    let guest_email = format!("{}@example.com", unique("guest"));
    let earlier = checkout_service::place_order(
        &state,
        &FakeGateway { amount_cents: 3_000 },
        None,
        guest_capture(product.id, 1, None, &guest_email),
    )
    .await?;

    let gateway = ClaimingGateway {
        pool: state.pool.clone(),
        claimed_by: earlier.order.id,
    };
    let request = guest_capture(product.id, 1, None, &guest_email);
    let capture_id = format!("CAP-{}", request.paypal_order_id);
    let err = checkout_service::place_order(&state, &gateway, None, request)
        .await
        .expect_err("order write conflicts");
    assert!(matches!(err, AppError::Internal(_)));

    let audited: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM audit_logs WHERE action = $1 AND metadata->>'capture_id' = $2",
    )
    .bind(checkout_service::AUDIT_CAPTURE_UNSAVED)
    .bind(&capture_id)
    .fetch_one(&state.pool)
    .await?;
    assert_eq!(audited, 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_redemptions_stop_at_max_uses() -> anyhow::Result<()> {
    let Some(state) = common::db_state().await? else {
        return Ok(());
    };

    let code = create_code(
        &state,
        NewCode {
            percent: 5,
            max_uses: Some(3),
            affiliate: None,
        },
    )
    .await?;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let orm = state.orm.clone();
        let code_id = code.id;
        handles.push(tokio::spawn(async move {
            discount_service::redeem(&orm, code_id, 10_000).await
        }));
    }

    let mut redeemed = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => redeemed += 1,
            Err(AppError::BusinessRule(_)) => exhausted += 1,
            Err(other) => return Err(other.into()),
        }
    }
    assert_eq!(redeemed, 3);
    assert_eq!(exhausted, 7);

    let uses = DiscountCodes::find_by_id(code.id)
        .one(&state.orm)
        .await?
        .expect("code")
        .current_uses;
    assert_eq!(uses, 3);
    Ok(())
}

#[tokio::test]
async fn commission_moves_only_forward() -> anyhow::Result<()> {
    let Some(state) = common::db_state().await? else {
        return Ok(());
    };

    let product = create_product(&state, 10_000, 3).await?;
    let code = create_code(
        &state,
        NewCode {
            percent: 10,
            max_uses: None,
            affiliate: Some((format!("{}@example.com", unique("aff")), Decimal::new(125, 1))),
        },
    )
    .await?;
    let guest_email = format!("{}@example.com", unique("guest"));
    let gateway = FakeGateway { amount_cents: 9_000 };
    let placed = checkout_service::place_order(
        &state,
        &gateway,
        None,
        guest_capture(product.id, 1, Some(code.code.clone()), &guest_email),
    )
    .await?;

    let commission = Commissions::find()
        .filter(CommissionCol::OrderId.eq(placed.order.id))
        .one(&state.orm)
        .await?
        .expect("commission recorded");
    // 12.5% of $90.00
    assert_eq!(commission.commission_amount, 1_125);

    let admin = AuthUser {
        user_id: uuid::Uuid::new_v4(),
        email: "admin@example.com".into(),
        role: "admin".into(),
    };
    discount_service::update_code(
        &state,
        &admin,
        code.id,
        UpdateDiscountRequest {
            commission_percent: Some(Decimal::from(30)),
            ..Default::default()
        },
    )
    .await?;
    let edited = DiscountCodes::find_by_id(code.id)
        .one(&state.orm)
        .await?
        .expect("code");
    assert_eq!(edited.commission_percent, Some(Decimal::from(30)));

    let snapshot = Commissions::find_by_id(commission.id)
        .one(&state.orm)
        .await?
        .expect("commission");
    assert_eq!(snapshot.commission_rate, Decimal::new(125, 1));
    assert_eq!(snapshot.commission_amount, 1_125);

    let skipped = commission_service::transition(&state.orm, commission.id, CommissionStatus::Paid)
        .await
        .expect_err("pending cannot jump to paid");
    assert!(matches!(skipped, AppError::BusinessRule(_)));

    let approved =
        commission_service::transition(&state.orm, commission.id, CommissionStatus::Approved)
            .await?;
    assert_eq!(approved.status, "approved");
    assert!(approved.approved_at.is_some());

    let paid =
        commission_service::transition(&state.orm, commission.id, CommissionStatus::Paid).await?;
    assert_eq!(paid.status, "paid");
    assert!(paid.paid_at.is_some());

    let cancelled =
        commission_service::transition(&state.orm, commission.id, CommissionStatus::Cancelled)
            .await
            .expect_err("paid is terminal");
    assert!(matches!(cancelled, AppError::BusinessRule(_)));
    Ok(())
}
