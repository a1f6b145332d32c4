//! Quote, PayPal order creation and order placement.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use uuid::Uuid;

use crate::{
    audit,
    dto::{
        cart::CartLine,
        orders::{
            CaptureRequest, OrderWithItems, PayPalOrderResponse, Quote, QuoteLine, QuoteRequest,
            ShippingDetails,
        },
    },
    entity::{
        discount_codes::Model as DiscountModel,
        order_items::ActiveModel as OrderItemActive,
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    paypal::{CapturedPayment, PayPalError, PaymentGateway},
    response::{ApiResponse, Meta},
    services::{
        auth_service::normalize_email,
        cart_service::{clear_user_cart, load_cart, merge_lines},
        commission_service,
        discount_service::{self, DiscountError},
    },
    state::AppState,
};

pub const ORDER_STATUS_PENDING: &str = "pending";
pub const ORDER_STATUS_PAID: &str = "paid";
pub const PAYMENT_UNPAID: &str = "unpaid";
pub const ORDER_STATUS_ON_HOLD: &str = "on_hold";
pub const PAYMENT_PAID: &str = "paid";
pub const PAYMENT_AMOUNT_MISMATCH: &str = "amount_mismatch";
pub const AUDIT_CAPTURE_UNSAVED: &str = "capture_unsaved";

/// `PS-YYYYMMDD-XXXXXXXX`, the suffix taken from the order id.
pub fn build_order_number(order_id: Uuid, at: DateTime<Utc>) -> String {
    let simple = order_id.simple().to_string();
    format!("PS-{}-{}", at.format("%Y%m%d"), simple[..8].to_uppercase())
}

/// Price `lines` against the catalog rows in `products`.
pub fn price_lines(lines: &[CartLine], products: &[ProductModel]) -> AppResult<Vec<QuoteLine>> {
    let by_id: HashMap<Uuid, &ProductModel> = products.iter().map(|p| (p.id, p)).collect();
    lines
        .iter()
        .map(|line| {
            if line.quantity <= 0 {
                return Err(AppError::BadRequest("Cart has invalid quantity".into()));
            }
            let product = by_id.get(&line.product_id).ok_or_else(|| {
                AppError::BadRequest(format!("Product {} is no longer available", line.product_id))
            })?;
            if product.stock < line.quantity {
                return Err(AppError::BusinessRule(format!(
                    "Insufficient stock for {}",
                    product.name
                )));
            }
            Ok(QuoteLine {
                product_id: product.id,
                name: product.name.clone(),
                unit_price: product.price,
                quantity: line.quantity,
                line_total: product.price * i64::from(line.quantity),
            })
        })
        .collect()
}

pub fn build_quote(lines: Vec<QuoteLine>, discount: Option<&DiscountModel>) -> Quote {
    let subtotal: i64 = lines.iter().map(|l| l.line_total).sum();
    let discount_amount = discount
        .map(|code| discount_service::calculate_discount(code, subtotal))
        .unwrap_or(0);
    Quote {
        lines,
        subtotal,
        discount_code: discount.map(|code| code.code.clone()),
        discount_amount,
        total: subtotal - discount_amount,
    }
}

fn payment_error(err: PayPalError) -> AppError {
    match err {
        PayPalError::NotCompleted(status) => {
            AppError::BusinessRule(format!("Payment was not completed (status {status})"))
        }
        other => {
            tracing::error!(error = %other, "payment provider call failed");
            AppError::ExternalService(other.to_string())
        }
    }
}

/// Lines to price: what the caller sent, or the signed-in buyer's server cart.
async fn resolve_lines(
    state: &AppState,
    user: Option<&AuthUser>,
    items: Option<Vec<CartLine>>,
) -> AppResult<Vec<CartLine>> {
    let lines = match (items, user) {
        (Some(items), _) => merge_lines(&[], &items),
        (None, Some(user)) => load_cart(&state.pool, user.user_id).await?.lines(),
        (None, None) => {
            return Err(AppError::BadRequest(
                "items are required for guest checkout".into(),
            ));
        }
    };
    if lines.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }
    Ok(lines)
}

async fn load_products<C: ConnectionTrait>(
    conn: &C,
    lines: &[CartLine],
    for_update: bool,
) -> AppResult<Vec<ProductModel>> {
    let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let mut finder = Products::find().filter(ProdCol::Id.is_in(ids));
    if for_update {
        finder = finder.lock(LockType::Update);
    }
    Ok(finder.all(conn).await?)
}

async fn price_with_discount<C: ConnectionTrait>(
    conn: &C,
    lines: &[CartLine],
    discount_code: Option<&str>,
) -> AppResult<(Quote, Option<DiscountModel>)> {
    let products = load_products(conn, lines, false).await?;
    let priced = price_lines(lines, &products)?;
    let subtotal: i64 = priced.iter().map(|l| l.line_total).sum();

    let code = match discount_code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => Some(discount_service::lookup_valid(conn, code, subtotal).await??),
        None => None,
    };
    let quote = build_quote(priced, code.as_ref());
    Ok((quote, code))
}

pub async fn quote(
    state: &AppState,
    user: Option<&AuthUser>,
    payload: QuoteRequest,
) -> AppResult<ApiResponse<Quote>> {
    let lines = resolve_lines(state, user, payload.items).await?;
    let (quote, _) =
        price_with_discount(&state.orm, &lines, payload.discount_code.as_deref()).await?;
    Ok(ApiResponse::success("Quote", quote, Some(Meta::empty())))
}

pub async fn create_paypal_order(
    state: &AppState,
    user: Option<&AuthUser>,
    payload: QuoteRequest,
) -> AppResult<ApiResponse<PayPalOrderResponse>> {
    let lines = resolve_lines(state, user, payload.items).await?;
    let (quote, _) =
        price_with_discount(&state.orm, &lines, payload.discount_code.as_deref()).await?;
    if quote.total <= 0 {
        return Err(AppError::BusinessRule(
            "Order total must be greater than zero".into(),
        ));
    }

    let reference = Uuid::new_v4().simple().to_string();
    let paypal_order_id = state
        .paypal
        .create_order(&reference, quote.total)
        .await
        .map_err(payment_error)?;

    tracing::info!(paypal_order_id, total = quote.total, "paypal order created");

    Ok(ApiResponse::success(
        "PayPal order created",
        PayPalOrderResponse {
            paypal_order_id,
            quote,
        },
        Some(Meta::empty()),
    ))
}

fn validate_shipping(shipping: &ShippingDetails) -> AppResult<()> {
    if shipping.name.trim().is_empty() || shipping.address.trim().is_empty() {
        return Err(AppError::BadRequest(
            "shipping name and address are required".into(),
        ));
    }
    Ok(())
}

/// The order belongs to the signed-in user or to a guest email, never both.
fn order_owner(user: Option<&AuthUser>, email: Option<&str>) -> AppResult<(Option<Uuid>, Option<String>)> {
    match user {
        Some(user) => Ok((Some(user.user_id), None)),
        None => {
            let email = email.map(normalize_email).unwrap_or_default();
            if email.is_empty() || !email.contains('@') {
                return Err(AppError::BadRequest(
                    "email is required for guest checkout".into(),
                ));
            }
            Ok((None, Some(email)))
        }
    }
}

struct PlacedOrder {
    order: OrderModel,
    items: Vec<OrderItem>,
    discount: Option<DiscountModel>,
}

async fn insert_order(
    txn: &DatabaseTransaction,
    owner: (Option<Uuid>, Option<String>),
    shipping: &ShippingDetails,
    quote: &Quote,
    discount: Option<&DiscountModel>,
) -> AppResult<(OrderModel, Vec<OrderItem>)> {
    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let (user_id, guest_email) = owner;

    let order = OrderActive {
        id: Set(order_id),
        order_number: Set(build_order_number(order_id, now)),
        user_id: Set(user_id),
        guest_email: Set(guest_email),
        status: Set(ORDER_STATUS_PENDING.into()),
        payment_status: Set(PAYMENT_UNPAID.into()),
        subtotal: Set(quote.subtotal),
        discount_amount: Set(quote.discount_amount),
        total_amount: Set(quote.total),
        discount_code_id: Set(discount.map(|d| d.id)),
        shipping_name: Set(shipping.name.trim().to_string()),
        shipping_phone: Set(shipping.phone.clone().filter(|p| !p.trim().is_empty())),
        shipping_address: Set(shipping.address.trim().to_string()),
        tracking_number: Set(None),
        paypal_order_id: Set(None),
        capture_id: Set(None),
        paid_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(txn)
    .await?;

    let mut items = Vec::with_capacity(quote.lines.len());
    for line in &quote.lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(line.unit_price),
            created_at: NotSet,
        }
        .insert(txn)
        .await?;
        items.push(OrderItem::from(item));

        let result = Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(line.quantity))
            .filter(ProdCol::Id.eq(line.product_id))
            .filter(ProdCol::Stock.gte(line.quantity))
            .exec(txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::BusinessRule(format!(
                "Insufficient stock for {}",
                line.name
            )));
        }
    }

    Ok((order, items))
}

/// Place an order and capture its payment in one transaction.
///
/// Nothing commits unless the gateway captures the payment. Once it has, the
/// order is kept: a total that differs from the capture puts the order on hold
/// for review, and a failed commit leaves an audit record of the capture.
pub async fn place_order<G: PaymentGateway>(
    state: &AppState,
    gateway: &G,
    user: Option<&AuthUser>,
    payload: CaptureRequest,
) -> AppResult<OrderWithItems> {
    validate_shipping(&payload.shipping)?;
    let owner = order_owner(user, payload.email.as_deref())?;
    let paypal_order_id = payload.paypal_order_id.trim().to_string();
    if paypal_order_id.is_empty() {
        return Err(AppError::BadRequest("paypal_order_id is required".into()));
    }

    let already = Orders::find()
        .filter(OrderCol::PaypalOrderId.eq(paypal_order_id.clone()))
        .one(&state.orm)
        .await?;
    if already.is_some() {
        return Err(AppError::Conflict("This payment has already been recorded".into()));
    }

    let lines = resolve_lines(state, user, payload.items).await?;

    let txn = state.orm.begin().await?;

    let products = load_products(&txn, &lines, true).await?;
    let priced = price_lines(&lines, &products)?;
    let subtotal: i64 = priced.iter().map(|l| l.line_total).sum();

    let discount = match payload.discount_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => {
            let found = discount_service::find_by_code(&txn, code)
                .await?
                .ok_or(DiscountError::Invalid)?;
            Some(discount_service::redeem(&txn, found.id, subtotal).await?)
        }
        None => None,
    };
    let quote = build_quote(priced, discount.as_ref());

    let (order, items) = insert_order(&txn, owner, &payload.shipping, &quote, discount.as_ref()).await?;

    let captured = gateway
        .capture(&paypal_order_id)
        .await
        .map_err(payment_error)?;

    let amount_matches = captured.amount_cents == quote.total;
    if !amount_matches {
        tracing::error!(
            order_id = %order.id,
            paypal_order_id,
            capture_id = %captured.capture_id,
            captured = captured.amount_cents,
            expected = quote.total,
            "captured amount does not match order total, holding order for review"
        );
    }

    let order = match record_capture(txn, order, &captured, amount_matches).await {
        Ok(order) => order,
        Err(err) => {
            tracing::error!(
                error = %err,
                paypal_order_id = %captured.paypal_order_id,
                capture_id = %captured.capture_id,
                amount = captured.amount_cents,
                "payment captured but the order could not be saved"
            );
            record_unsaved_capture(state, user, &captured, &quote).await;
            return Err(AppError::Internal(anyhow::anyhow!(
                "payment {} captured without a stored order",
                captured.capture_id
            )));
        }
    };

    let placed = PlacedOrder {
        order,
        items,
        discount,
    };
    after_commit(state, user, &placed, &captured.capture_id).await;

    Ok(OrderWithItems {
        order: Order::from(placed.order),
        items: placed.items,
    })
}

/// Store the capture on the pending order and commit.
async fn record_capture(
    txn: DatabaseTransaction,
    order: OrderModel,
    captured: &CapturedPayment,
    amount_matches: bool,
) -> Result<OrderModel, DbErr> {
    let now = Utc::now();
    let (status, payment_status) = if amount_matches {
        (ORDER_STATUS_PAID, PAYMENT_PAID)
    } else {
        (ORDER_STATUS_ON_HOLD, PAYMENT_AMOUNT_MISMATCH)
    };

    let mut active: OrderActive = order.into();
    active.status = Set(status.into());
    active.payment_status = Set(payment_status.into());
    active.paypal_order_id = Set(Some(captured.paypal_order_id.clone()));
    active.capture_id = Set(Some(captured.capture_id.clone()));
    active.paid_at = Set(Some(now.into()));
    active.updated_at = Set(now.into());
    let order = active.update(&txn).await?;

    txn.commit().await?;
    Ok(order)
}

/// Last record of a capture whose order transaction was lost.
async fn record_unsaved_capture(
    state: &AppState,
    user: Option<&AuthUser>,
    captured: &CapturedPayment,
    quote: &Quote,
) {
    let metadata = serde_json::json!({
        "paypal_order_id": captured.paypal_order_id,
        "capture_id": captured.capture_id,
        "amount_cents": captured.amount_cents,
        "currency": captured.currency,
        "expected_total": quote.total,
        "lines": quote
            .lines
            .iter()
            .map(|l| serde_json::json!({ "product_id": l.product_id, "quantity": l.quantity }))
            .collect::<Vec<_>>(),
    });
    if let Err(err) = audit::log_audit(
        &state.pool,
        user.map(|u| u.user_id),
        AUDIT_CAPTURE_UNSAVED,
        Some("orders"),
        Some(metadata),
    )
    .await
    {
        tracing::error!(
            error = %err,
            paypal_order_id = %captured.paypal_order_id,
            capture_id = %captured.capture_id,
            "failed to record unsaved capture"
        );
    }
}

/// Side effects that must never undo a captured payment.
async fn after_commit(state: &AppState, user: Option<&AuthUser>, placed: &PlacedOrder, capture_id: &str) {
    if let Some(code) = &placed.discount {
        if let Err(err) = commission_service::record_for_order(
            &state.orm,
            placed.order.id,
            code,
            placed.order.total_amount,
        )
        .await
        {
            tracing::error!(
                error = %err,
                order_id = %placed.order.id,
                discount_code_id = %code.id,
                "failed to record affiliate commission"
            );
        }
    }

    if let Some(user) = user {
        if let Err(err) = clear_user_cart(&state.pool, user.user_id).await {
            tracing::warn!(error = %err, user_id = %user.user_id, "failed to clear cart after checkout");
        }
    }

    audit::record(
        &state.pool,
        user.map(|u| u.user_id),
        "checkout",
        "orders",
        serde_json::json!({
            "order_id": placed.order.id,
            "order_number": placed.order.order_number,
            "total_amount": placed.order.total_amount,
            "capture_id": capture_id,
        }),
    )
    .await;

    tracing::info!(
        order_id = %placed.order.id,
        order_number = %placed.order.order_number,
        total = placed.order.total_amount,
        guest = user.is_none(),
        "order placed"
    );
}

pub async fn capture(
    state: &AppState,
    user: Option<&AuthUser>,
    payload: CaptureRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let placed = place_order(state, &state.paypal, user, payload).await?;
    let message = if placed.order.payment_status == PAYMENT_AMOUNT_MISMATCH {
        "Payment received, order held for review"
    } else {
        "Checkout success"
    };
    Ok(ApiResponse::success(
        message,
        placed,
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscountKind;
    use crate::services::discount_service::tests::code;
    use chrono::TimeZone;

    fn product(price: i64, stock: i32) -> ProductModel {
        ProductModel {
            id: Uuid::new_v4(),
            name: "BPC-157 5mg".into(),
            description: None,
            price,
            stock,
            purity: Some(">=99%".into()),
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn order_number_is_dated_and_short() {
        let id = Uuid::parse_str("1a2b3c4d-0000-4000-8000-000000000000").expect("uuid");
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).single().expect("date");
        assert_eq!(build_order_number(id, at), "PS-20261016-1A2B3C4D");
    }

    #[test]
    fn lines_are_priced_from_catalog() {
        let p = product(4_500, 10);
        let lines = [CartLine {
            product_id: p.id,
            quantity: 3,
        }];
        let priced = price_lines(&lines, &[p]).expect("priced");
        assert_eq!(priced[0].line_total, 13_500);
    }

    #[test]
    fn unknown_or_short_products_fail() {
        let p = product(4_500, 1);
        let over = [CartLine {
            product_id: p.id,
            quantity: 2,
        }];
        assert!(matches!(
            price_lines(&over, std::slice::from_ref(&p)),
            Err(AppError::BusinessRule(_))
        ));

        let missing = [CartLine {
            product_id: Uuid::new_v4(),
            quantity: 1,
        }];
        assert!(matches!(price_lines(&missing, &[p]), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn quote_applies_discount_to_subtotal() {
        let p = product(3_000, 10);
        let lines = price_lines(
            &[CartLine {
                product_id: p.id,
                quantity: 1,
            }],
            &[p],
        )
        .expect("priced");
        let fifty_off = code(DiscountKind::Fixed, 5_000);

        let quote = build_quote(lines, Some(&fifty_off));
        assert_eq!(quote.subtotal, 3_000);
        assert_eq!(quote.discount_amount, 3_000);
        assert_eq!(quote.total, 0);
        assert_eq!(quote.discount_code.as_deref(), Some("SAVE10"));
    }

    #[test]
    fn guests_must_give_an_email() {
        assert!(order_owner(None, None).is_err());
        assert!(order_owner(None, Some("nope")).is_err());
        assert_eq!(
            order_owner(None, Some(" Guest@Example.com ")).expect("owner"),
            (None, Some("guest@example.com".into()))
        );

        let user = AuthUser {
            user_id: Uuid::new_v4(),
            email: "member@example.com".into(),
            role: "user".into(),
        };
        let (user_id, guest_email) = order_owner(Some(&user), Some("other@example.com")).expect("owner");
        assert_eq!(user_id, Some(user.user_id));
        assert_eq!(guest_email, None);
    }

    #[test]
    fn incomplete_payment_is_a_business_error() {
        assert!(matches!(
            payment_error(PayPalError::NotCompleted("PENDING".into())),
            AppError::BusinessRule(_)
        ));
        assert!(matches!(
            payment_error(PayPalError::Authentication("bad".into())),
            AppError::ExternalService(_)
        ));
    }
}
