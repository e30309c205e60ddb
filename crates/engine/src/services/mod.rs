//! Business services built on the stores and gateway ports.

pub mod orders;
pub mod otp;
pub mod rates;

pub use orders::{
    AsyncPaymentNotice, CheckoutUrls, CreateOrderRequest, CustomerDetails, LineItemRequest,
    OrderService, PaymentInstrument, PaymentOutcome, ReconcileOutcome,
};
pub use rates::{CustomerRateChange, RateCache, RateService, RateSource, ResolvedRate};
