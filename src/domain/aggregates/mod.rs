//! Aggregates module
pub mod address;
pub mod cart;
pub mod metrics;
pub mod order;
pub mod product;
pub mod slip;
pub mod snapshot;

pub use address::{AddressRecord, AddressSource};
pub use cart::{Cart, CartLine, ProductTotal};
pub use metrics::{DailySales, SlipMetrics, SlipTotals};
pub use order::{NewOrder, OrderLine, OrderLineDetail, OrderRecord};
pub use product::{Product, StockChange};
pub use slip::{DeleteMode, DeleteModeError, NewSlip, PaymentSlip, SlipAction, SlipStatus, StatusError, Transition};
pub use snapshot::{PaymentSlipItem, SnapshotItem};
