//! Domain layer: slips, snapshots, mirrored orders and product stock.
pub mod aggregates;
pub mod events;
pub mod value_objects;
