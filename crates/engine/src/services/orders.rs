//! Order lifecycle orchestration.
//!
//! Every status change funnels through the store's compare-and-set, so a
//! duplicate request (double-clicked verify, replayed webhook) settles to
//! exactly one transition. Gateway calls happen only after the order has
//! been claimed into `PaymentAuthorizing`; an unverified order never
//! reaches a gateway.

use std::sync::Arc;

use chrono::Utc;
use coinforge_core::{
    CurrencyCode, EmailAddress, FulfillmentStatus, Money, OrderId, OrderStatus, PaymentMethod,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::EngineError;
use crate::gateway::{
    CardChargeRequest, CardGateway, CardGatewayError, CryptoGateway, CryptoGatewayError,
    CryptoPaymentStatus, CryptoSession, PayerInfo, SessionRequest,
};
use crate::models::{Address, Customer, GatewayCorrelation, LineItem, Order, OrderEvent};
use crate::notify::{Notification, Notifier, send_best_effort};
use crate::services::otp::{self, OtpError};
use crate::services::rates::RateService;
use crate::store::{Cas, OrderStore};

/// Purchaser details submitted with a new order.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// External account the coins land in once fulfilled.
    pub account_id: String,
    #[serde(default)]
    pub address: Option<Address>,
}

/// One purchased position.
#[derive(Debug, Clone, Deserialize)]
pub struct LineItemRequest {
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

/// A new order, as submitted at checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub customer: CustomerDetails,
    pub items: Vec<LineItemRequest>,
    pub method: PaymentMethod,
    #[serde(default)]
    pub currency: CurrencyCode,
}

/// Payment details submitted once the order is verified.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentInstrument {
    /// A processor-minted card token plus the billing address.
    Card {
        token: String,
        billing_address: Address,
    },
    /// The currency the customer wants to settle in.
    Crypto { target_currency: String },
}

/// How an authorization attempt ended, for callers that got an `Ok`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// The charge settled synchronously.
    Completed { order: Order },
    /// A hosted crypto session is open; settlement arrives by webhook.
    PendingAsync {
        order: Order,
        redirect_url: String,
        deposit_address: String,
    },
}

/// An async-payment notice, from a webhook or an operator nudge.
#[derive(Debug, Clone, Deserialize)]
pub struct AsyncPaymentNotice {
    #[serde(default)]
    pub payment_session_id: Option<String>,
    /// Order reference, for processors that echo it instead of the session.
    #[serde(default)]
    pub reference: Option<String>,
}

/// What reconciliation concluded.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// The processor confirmed settlement; the order completed now.
    Completed(Order),
    /// The processor reported the session dead; the order failed now.
    Failed(Order),
    /// Nothing settled yet; the order stays pending.
    StillWaiting(Order),
    /// The order was not awaiting an async payment; nothing changed.
    NotPending(Order),
}

/// Redirect targets handed to the crypto processor when opening a session.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub webhook_url: String,
    pub success_url: String,
    pub failure_url: String,
}

/// Orchestrates orders from creation through fulfillment.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    rates: RateService,
    card: Arc<dyn CardGateway>,
    crypto: Arc<dyn CryptoGateway>,
    notifier: Arc<dyn Notifier>,
    urls: CheckoutUrls,
    admin_email: EmailAddress,
}

impl OrderService {
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        rates: RateService,
        card: Arc<dyn CardGateway>,
        crypto: Arc<dyn CryptoGateway>,
        notifier: Arc<dyn Notifier>,
        urls: CheckoutUrls,
        admin_email: EmailAddress,
    ) -> Self {
        Self {
            store,
            rates,
            card,
            crypto,
            notifier,
            urls,
            admin_email,
        }
    }

    /// Create an order, freezing the coin rate that applies to it.
    ///
    /// The purchaser's customer record is created or refreshed in the same
    /// step. Later rate changes never touch the frozen rate.
    ///
    /// # Errors
    ///
    /// Fails on an invalid email, empty or non-positive line items, or a
    /// storage error.
    #[instrument(skip(self, request))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, EngineError> {
        let email = EmailAddress::parse(&request.customer.email)?;
        if request.customer.display_name.trim().is_empty() {
            return Err(EngineError::Validation("display name is required".to_owned()));
        }
        if request.customer.account_id.trim().is_empty() {
            return Err(EngineError::Validation("account id is required".to_owned()));
        }
        if request.items.is_empty() {
            return Err(EngineError::Validation(
                "order must contain at least one item".to_owned(),
            ));
        }
        for item in &request.items {
            if item.name.trim().is_empty() {
                return Err(EngineError::Validation("item name is required".to_owned()));
            }
            if item.quantity == 0 {
                return Err(EngineError::Validation(
                    format!("item {:?} has zero quantity", item.name),
                ));
            }
            if item.unit_price <= Decimal::ZERO {
                return Err(EngineError::Validation(
                    format!("item {:?} has a non-positive price", item.name),
                ));
            }
        }

        let applied_rate = self.rates.resolve(Some(&email)).await?.rate;

        let mut items = Vec::with_capacity(request.items.len());
        let mut total = Decimal::ZERO;
        let mut coins_total = Decimal::ZERO;
        for item in request.items {
            let line = LineItem {
                name: item.name,
                unit_price: item.unit_price,
                quantity: item.quantity,
                coins_per_item: applied_rate.coins_for(item.unit_price),
            };
            total += line.subtotal();
            coins_total += line.coins_subtotal();
            items.push(line);
        }

        let now = Utc::now();
        self.store
            .upsert_customer(Customer {
                email: email.clone(),
                display_name: request.customer.display_name,
                phone: request.customer.phone,
                account_id: request.customer.account_id,
                address: request.customer.address,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let order = Order {
            id: OrderId::new(),
            email,
            items,
            amount: Money::new(total, request.currency),
            coins_total,
            applied_rate,
            method: request.method,
            status: OrderStatus::Created,
            otp: None,
            gateway: GatewayCorrelation::default(),
            fulfillment: FulfillmentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(order.clone()).await?;

        info!(order_id = %order.id, amount = %order.amount, "order created");
        Ok(order)
    }

    /// Issue (or re-issue) a verification code and send it to the purchaser.
    ///
    /// A minute must pass between two codes for the same order. Delivery is
    /// best-effort; the code is live once this returns.
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown, already past verification, or inside
    /// the re-issue cooldown.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn request_verification(&self, id: OrderId) -> Result<Order, EngineError> {
        let order = self.get_order(id).await?;
        Self::ensure_awaiting_verification(&order)?;

        let now = Utc::now();
        if let Some(challenge) = &order.otp
            && let Some(retry_in_secs) = otp::seconds_until_reissue(challenge, now)
        {
            return Err(OtpError::TooSoon { retry_in_secs }.into());
        }

        let code = otp::generate_code();
        let challenge = otp::new_challenge(id, &code, now);
        let expected = [OrderStatus::Created, OrderStatus::OtpPending];
        let order = match self.store.apply(id, &expected, OrderEvent::OtpIssued(challenge)).await? {
            Cas::Applied(order) => order,
            Cas::Stale(_) => {
                return Err(EngineError::Conflict(
                    "order can no longer accept a verification code".to_owned(),
                ));
            }
        };

        send_best_effort(
            self.notifier.as_ref(),
            &order.email,
            Notification::VerificationCode { order_id: id, code },
        )
        .await;

        info!(order_id = %id, "verification code issued");
        Ok(order)
    }

    /// Check a verification code against the open challenge.
    ///
    /// Verifying an already-verified order succeeds without a second
    /// transition. Wrong codes burn one of three attempts; once spent, even
    /// the right code is refused until a new code is issued.
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown, no code was issued, the code expired,
    /// attempts ran out, or the code does not match.
    #[instrument(skip(self, code), fields(order_id = %id))]
    pub async fn verify_otp(&self, id: OrderId, code: &str) -> Result<Order, EngineError> {
        let order = self.get_order(id).await?;
        let Some(challenge) = &order.otp else {
            return Err(OtpError::NoChallenge.into());
        };

        if challenge.verified {
            return Ok(order);
        }
        if challenge.is_expired_at(Utc::now()) {
            return Err(OtpError::Expired.into());
        }
        if challenge.attempts >= otp::MAX_ATTEMPTS {
            return Err(OtpError::TooManyAttempts.into());
        }

        if challenge.code_hash != otp::hash_code(id, code) {
            let attempts = self.store.record_failed_attempt(id).await?;
            return Err(OtpError::InvalidCode {
                remaining: otp::MAX_ATTEMPTS.saturating_sub(attempts),
            }
            .into());
        }

        match self
            .store
            .apply(id, &[OrderStatus::OtpPending], OrderEvent::OtpConfirmed)
            .await?
        {
            Cas::Applied(order) => {
                info!(order_id = %id, "order verified");
                Ok(order)
            }
            // A concurrent identical request won the race; same outcome.
            Cas::Stale(order) if order.is_verified() => Ok(order),
            Cas::Stale(_) => Err(EngineError::Conflict(
                "order can no longer be verified".to_owned(),
            )),
        }
    }

    /// Authorize payment for a verified order.
    ///
    /// The order is first claimed into `PaymentAuthorizing`; only the
    /// request that wins the claim talks to a gateway. Card charges settle
    /// synchronously; crypto opens a hosted session and the order parks in
    /// `PendingAsync` until the processor's webhook arrives.
    ///
    /// # Errors
    ///
    /// `NotVerified` before verification (no gateway is contacted),
    /// `GatewayDeclined` on a refused charge, `GatewayUnavailable` when the
    /// processor cannot be reached (both leave the order failed), `Conflict`
    /// when payment already ran.
    #[instrument(skip(self, instrument), fields(order_id = %id))]
    pub async fn authorize_payment(
        &self,
        id: OrderId,
        instrument: PaymentInstrument,
    ) -> Result<PaymentOutcome, EngineError> {
        let order = self.get_order(id).await?;
        match (order.method, &instrument) {
            (PaymentMethod::Card, PaymentInstrument::Card { .. })
            | (PaymentMethod::Crypto, PaymentInstrument::Crypto { .. }) => {}
            (method, _) => {
                return Err(EngineError::Validation(format!(
                    "payment instrument does not match the order's {method} method"
                )));
            }
        }

        // Claim the order before any gateway traffic.
        let order = match self
            .store
            .apply(
                id,
                &[OrderStatus::OtpVerified],
                OrderEvent::AuthorizationStarted,
            )
            .await?
        {
            Cas::Applied(order) => order,
            Cas::Stale(order) => return Err(Self::authorization_refused(&order)),
        };

        match instrument {
            PaymentInstrument::Card {
                token,
                billing_address,
            } => self.capture_card(order, token, billing_address).await,
            PaymentInstrument::Crypto { target_currency } => {
                self.open_crypto_session(order, target_currency).await
            }
        }
    }

    async fn capture_card(
        &self,
        order: Order,
        token: String,
        billing_address: Address,
    ) -> Result<PaymentOutcome, EngineError> {
        let request = CardChargeRequest {
            amount: order.amount,
            order_ref: order.id,
            customer_name: self.customer_name(&order.email).await?,
            customer_email: order.email.clone(),
            instrument_token: token,
            billing_address,
        };

        match self.card.capture(&request).await {
            Ok(receipt) => {
                let order = self
                    .settle(
                        order.id,
                        OrderEvent::CardCaptured {
                            transaction_id: receipt.transaction_id,
                            auth_code: receipt.auth_code,
                        },
                    )
                    .await?;
                info!(order_id = %order.id, "card charge captured");
                self.send_completion_notices(&order).await;
                Ok(PaymentOutcome::Completed { order })
            }
            Err(CardGatewayError::Declined { reason_code }) => {
                warn!(order_id = %order.id, reason_code, "card charge declined");
                self.settle(
                    order.id,
                    OrderEvent::PaymentDeclined {
                        reason_code: reason_code.clone(),
                    },
                )
                .await?;
                Err(EngineError::GatewayDeclined { reason_code })
            }
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "card gateway unavailable");
                let detail = err.to_string();
                self.settle(
                    order.id,
                    OrderEvent::PaymentErrored {
                        detail: detail.clone(),
                    },
                )
                .await?;
                Err(EngineError::GatewayUnavailable { detail })
            }
        }
    }

    async fn open_crypto_session(
        &self,
        order: Order,
        target_currency: String,
    ) -> Result<PaymentOutcome, EngineError> {
        if target_currency.trim().is_empty() {
            // The claim is already taken; surface this as a failed attempt.
            self.settle(
                order.id,
                OrderEvent::PaymentErrored {
                    detail: "no target currency".to_owned(),
                },
            )
            .await?;
            return Err(EngineError::Validation(
                "target currency is required".to_owned(),
            ));
        }

        let payer = PayerInfo {
            name: self.customer_name(&order.email).await?,
            email: order.email.clone(),
        };

        let session = match self.quote_and_open(&order, &payer, &target_currency).await {
            Ok(session) => session,
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "crypto gateway unavailable");
                let detail = err.to_string();
                self.settle(
                    order.id,
                    OrderEvent::PaymentErrored {
                        detail: detail.clone(),
                    },
                )
                .await?;
                return Err(EngineError::GatewayUnavailable { detail });
            }
        };

        let order = self
            .settle(
                order.id,
                OrderEvent::CryptoSessionOpened {
                    payment_session_id: session.payment_session_id,
                    deposit_address: session.deposit_address.clone(),
                    redirect_url: session.redirect_url.clone(),
                    crypto_currency: target_currency,
                },
            )
            .await?;
        info!(order_id = %order.id, "crypto payment session opened");
        Ok(PaymentOutcome::PendingAsync {
            order,
            redirect_url: session.redirect_url,
            deposit_address: session.deposit_address,
        })
    }

    /// Quote, then open the session; a quote that lapses in between is
    /// re-fetched once.
    async fn quote_and_open(
        &self,
        order: &Order,
        payer: &PayerInfo,
        target_currency: &str,
    ) -> Result<CryptoSession, CryptoGatewayError> {
        let quote = self
            .crypto
            .quote(
                order.amount.currency.code(),
                order.amount.amount,
                target_currency,
            )
            .await?;

        let mut request = SessionRequest {
            quote_id: quote.quote_id,
            reference: order.id.to_string(),
            payer: payer.clone(),
            webhook_url: self.urls.webhook_url.clone(),
            success_url: self.urls.success_url.clone(),
            failure_url: self.urls.failure_url.clone(),
        };

        match self.crypto.start_session(&request).await {
            Err(CryptoGatewayError::QuoteExpired) => {
                let quote = self
                    .crypto
                    .quote(
                        order.amount.currency.code(),
                        order.amount.amount,
                        target_currency,
                    )
                    .await?;
                request.quote_id = quote.quote_id;
                self.crypto.start_session(&request).await
            }
            other => other,
        }
    }

    /// Settle an async payment from a processor notice.
    ///
    /// The notice body is never trusted: the processor is asked for the
    /// authoritative status before any transition. Replays and premature
    /// notices are no-ops.
    ///
    /// # Errors
    ///
    /// Fails when the notice references nothing, the order is unknown, or
    /// the status check cannot reach the processor (the order is left
    /// pending for the next notice).
    #[instrument(skip(self, notice))]
    pub async fn reconcile_async_payment(
        &self,
        notice: AsyncPaymentNotice,
    ) -> Result<ReconcileOutcome, EngineError> {
        let order = self.find_noticed_order(&notice).await?;
        if order.status != OrderStatus::PendingAsync {
            info!(order_id = %order.id, status = %order.status, "payment notice for a settled order ignored");
            return Ok(ReconcileOutcome::NotPending(order));
        }

        let session_id = order.gateway.payment_session_id.clone();
        let deposit = order.gateway.deposit_address.clone();
        let currency = order.gateway.crypto_currency.clone();
        let (Some(session_id), Some(deposit), Some(currency)) = (session_id, deposit, currency)
        else {
            return Err(EngineError::Conflict(
                "order is awaiting payment but carries no session record".to_owned(),
            ));
        };

        let status = self
            .crypto
            .check_status(&session_id, &deposit, &currency)
            .await
            .map_err(|err| EngineError::GatewayUnavailable {
                detail: err.to_string(),
            })?;

        match status {
            CryptoPaymentStatus::Confirmed => {
                match self
                    .store
                    .apply(order.id, &[OrderStatus::PendingAsync], OrderEvent::CryptoConfirmed)
                    .await?
                {
                    Cas::Applied(order) => {
                        info!(order_id = %order.id, "crypto payment confirmed");
                        self.send_completion_notices(&order).await;
                        Ok(ReconcileOutcome::Completed(order))
                    }
                    // A concurrent notice settled it first; no second receipt.
                    Cas::Stale(order) => Ok(ReconcileOutcome::NotPending(order)),
                }
            }
            CryptoPaymentStatus::Cancelled => {
                match self
                    .store
                    .apply(order.id, &[OrderStatus::PendingAsync], OrderEvent::CryptoCancelled)
                    .await?
                {
                    Cas::Applied(order) => {
                        warn!(order_id = %order.id, "crypto payment cancelled");
                        Ok(ReconcileOutcome::Failed(order))
                    }
                    Cas::Stale(order) => Ok(ReconcileOutcome::NotPending(order)),
                }
            }
            CryptoPaymentStatus::Waiting => Ok(ReconcileOutcome::StillWaiting(order)),
        }
    }

    /// Mark a completed order's coins as credited.
    ///
    /// Idempotent: repeating the call changes nothing, unless `resend` asks
    /// for the confirmation notice to go out again.
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown or not completed.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn mark_fulfilled(&self, id: OrderId, resend: bool) -> Result<Order, EngineError> {
        let order = self.get_order(id).await?;
        if order.status != OrderStatus::Completed {
            return Err(EngineError::Conflict(
                "only completed orders can be fulfilled".to_owned(),
            ));
        }

        let first_time = order.fulfillment == FulfillmentStatus::Pending;
        if !first_time && !resend {
            return Ok(order);
        }

        let order = self
            .store
            .set_fulfillment(id, FulfillmentStatus::Fulfilled)
            .await?;

        let account_id = self
            .store
            .get_customer(&order.email)
            .await?
            .map(|c| c.account_id)
            .unwrap_or_default();
        send_best_effort(
            self.notifier.as_ref(),
            &order.email,
            Notification::FulfillmentConfirmed {
                order_id: id,
                coins: order.coins_total,
                account_id,
            },
        )
        .await;

        info!(order_id = %id, first_time, "order fulfilled");
        Ok(order)
    }

    /// Fetch an order.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id is unknown.
    pub async fn get_order(&self, id: OrderId) -> Result<Order, EngineError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {id}")))
    }

    async fn find_noticed_order(&self, notice: &AsyncPaymentNotice) -> Result<Order, EngineError> {
        if let Some(session_id) = &notice.payment_session_id
            && let Some(order) = self.store.get_by_payment_session(session_id).await?
        {
            return Ok(order);
        }
        if let Some(reference) = &notice.reference {
            let id = reference.parse::<OrderId>().map_err(|_| {
                EngineError::Validation("notice reference is not an order id".to_owned())
            })?;
            return self.get_order(id).await;
        }
        match &notice.payment_session_id {
            Some(session_id) => Err(EngineError::NotFound(format!(
                "payment session {session_id}"
            ))),
            None => Err(EngineError::Validation(
                "notice carries neither a session id nor a reference".to_owned(),
            )),
        }
    }

    async fn settle(&self, id: OrderId, event: OrderEvent) -> Result<Order, EngineError> {
        match self
            .store
            .apply(id, &[OrderStatus::PaymentAuthorizing], event)
            .await?
        {
            Cas::Applied(order) => Ok(order),
            Cas::Stale(order) => Err(EngineError::Conflict(format!(
                "order moved to {} during authorization",
                order.status
            ))),
        }
    }

    async fn customer_name(&self, email: &EmailAddress) -> Result<String, EngineError> {
        Ok(self
            .store
            .get_customer(email)
            .await?
            .map_or_else(|| email.as_str().to_owned(), |c| c.display_name))
    }

    async fn send_completion_notices(&self, order: &Order) {
        send_best_effort(
            self.notifier.as_ref(),
            &order.email,
            Notification::PaymentReceipt {
                order_id: order.id,
                amount: order.amount,
                coins: order.coins_total,
            },
        )
        .await;
        send_best_effort(
            self.notifier.as_ref(),
            &self.admin_email,
            Notification::NewOrderAlert {
                order_id: order.id,
                customer: order.email.clone(),
                amount: order.amount,
                method: order.method,
            },
        )
        .await;
    }

    fn ensure_awaiting_verification(order: &Order) -> Result<(), EngineError> {
        match order.status {
            OrderStatus::Created | OrderStatus::OtpPending => Ok(()),
            OrderStatus::OtpVerified => Err(EngineError::Conflict(
                "order is already verified".to_owned(),
            )),
            OrderStatus::PaymentAuthorizing | OrderStatus::PendingAsync => Err(
                EngineError::Conflict("payment is already in progress".to_owned()),
            ),
            OrderStatus::Completed => Err(EngineError::Conflict(
                "order is already completed".to_owned(),
            )),
            OrderStatus::Failed => Err(EngineError::Conflict("order has failed".to_owned())),
        }
    }

    fn authorization_refused(order: &Order) -> EngineError {
        match order.status {
            OrderStatus::Created | OrderStatus::OtpPending => EngineError::NotVerified,
            OrderStatus::PaymentAuthorizing | OrderStatus::PendingAsync => {
                EngineError::Conflict("payment is already in progress".to_owned())
            }
            OrderStatus::Completed => {
                EngineError::Conflict("order is already completed".to_owned())
            }
            _ => EngineError::Conflict("order is not ready for payment".to_owned()),
        }
    }
}
