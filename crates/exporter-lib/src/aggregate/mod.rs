//! Windowed aggregation for high-churn objects
//!
//! Where exact per-object retention is undesirable, observations fold into
//! coarse buckets that keep first/last-seen timestamps and are reclaimed on
//! a timer or, for events, by a hard capacity bound.

pub mod cleanup;
pub mod clock;
pub mod event;
pub mod pod;
pub mod window;


pub use cleanup::{CleanupLoop, WindowCleanup};
pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{
    AggregatedEvents, EventAggregator, EventCollector, EventCollectorConfig, EventDims,
};
pub use pod::{
    is_pod_abnormal, AbnormalPod, AggregatedPods, PodAggregator, PodAggregatorConfig,
    PodCollector, PodCollectorConfig, PodDims,
};
pub use window::{Bucket, BucketMap, Contribution};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Decode a watched object into its typed form, logging objects that do
/// not fit.
fn decode<T: DeserializeOwned>(collector: &str, obj: &Value) -> Option<T> {
    match T::deserialize(obj) {
        Ok(typed) => Some(typed),
        Err(e) => {
            warn!(
                collector = %collector,
                error = %e,
                "Ignoring object that does not decode"
            );
            None
        }
    }
}
