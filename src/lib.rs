#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref,
    clippy::module_inception
)]
pub mod error;
pub mod fraud;
pub mod grid;
pub mod metrics;
pub mod pipeline;
pub mod plot;
pub mod records;
pub mod reference;
pub mod segmentation;
pub mod trips;
pub mod zones;

pub use crate::error::{Error, Result};
pub use crate::records::GpsRecord;
pub use crate::segmentation::{label_trajectories, LabelledRecord, RouteNumber, SegmentOptions};
pub use crate::trips::{collect_trips, RouteFilter, Trip};
pub use crate::zones::{BoundingBox, ZoneKind, ZoneSet};
