//! Threshold monitoring
//!
//! A monitor compares a live measured value against a threshold on every
//! scheduler cycle and notifies its listeners only when the comparison
//! changes state, so a resource that stays over its limit produces one
//! event rather than one per cycle.

mod monitors;

pub use monitors::{
    cpu_idle_monitor, free_memory_monitor, nic_throughput_monitor, CPU_IDLE_CLASS,
    CPU_RESOURCE_ID, MEMORY_FREE_CLASS, MEMORY_RESOURCE_ID, NIC_THROUGHPUT_CLASS,
};

use crate::models::{ThresholdEvent, ThresholdEventType};
use std::sync::Arc;

/// Zero-argument query re-invoked every cycle
pub type QueryFunction = Box<dyn Fn() -> f64 + Send + Sync>;

/// Callback receiving threshold events
pub type ThresholdListener = Arc<dyn Fn(&ThresholdEvent) + Send + Sync>;

/// Which side of the threshold counts as exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Exceeded while measured < threshold
    Below,
    /// Exceeded while measured > threshold
    Above,
}

impl Direction {
    pub fn is_exceeded(&self, measured: f64, threshold: f64) -> bool {
        match self {
            Direction::Below => measured < threshold,
            Direction::Above => measured > threshold,
        }
    }
}

/// A monitored resource
pub trait ThresholdMonitor: Send + Sync {
    fn source_id(&self) -> &str;
    fn resource_id(&self) -> &str;
    fn message_class(&self) -> &str;
    fn threshold(&self) -> f64;
    fn measured(&self) -> f64;
    /// Whether the last update found the threshold exceeded
    fn is_exceeded(&self) -> bool;
    /// Re-read both accessors; returns the event emitted, if any
    fn update(&mut self) -> Option<ThresholdEvent>;
    fn attach_listener(&mut self, listener: ThresholdListener);
}

/// Monitor over a pair of accessor functions
pub struct GenericThresholdMonitor {
    source_id: String,
    resource_id: String,
    message_class: String,
    direction: Direction,
    threshold: QueryFunction,
    measured: QueryFunction,
    exceeded: bool,
    listeners: Vec<ThresholdListener>,
}

impl GenericThresholdMonitor {
    pub fn new(
        source_id: impl Into<String>,
        resource_id: impl Into<String>,
        message_class: impl Into<String>,
        direction: Direction,
        threshold: QueryFunction,
        measured: QueryFunction,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            resource_id: resource_id.into(),
            message_class: message_class.into(),
            direction,
            threshold,
            measured,
            exceeded: false,
            listeners: Vec::new(),
        }
    }

    fn build_event(
        &self,
        event_type: ThresholdEventType,
        threshold: f64,
        measured: f64,
    ) -> ThresholdEvent {
        let verb = match event_type {
            ThresholdEventType::ThresholdExceeded => "exceeded",
            ThresholdEventType::ThresholdNotExceeded => "no longer exceeded",
        };
        ThresholdEvent {
            source_id: self.source_id.clone(),
            resource_id: self.resource_id.clone(),
            threshold_class: self.message_class.clone(),
            event_type,
            threshold_value: threshold,
            measured_value: measured,
            message: format!(
                "{} threshold {} (resource_id={} threshold={} measured={})",
                self.message_class, verb, self.resource_id, threshold, measured
            ),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

impl ThresholdMonitor for GenericThresholdMonitor {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn message_class(&self) -> &str {
        &self.message_class
    }

    fn threshold(&self) -> f64 {
        (self.threshold)()
    }

    fn measured(&self) -> f64 {
        (self.measured)()
    }

    fn is_exceeded(&self) -> bool {
        self.exceeded
    }

    fn update(&mut self) -> Option<ThresholdEvent> {
        let threshold = self.threshold();
        let measured = self.measured();

        // NaN compares false both ways; treat it as no information
        if threshold.is_nan() || measured.is_nan() {
            return None;
        }

        let exceeded = self.direction.is_exceeded(measured, threshold);
        if exceeded == self.exceeded {
            return None;
        }
        self.exceeded = exceeded;

        let event_type = if exceeded {
            ThresholdEventType::ThresholdExceeded
        } else {
            ThresholdEventType::ThresholdNotExceeded
        };
        let event = self.build_event(event_type, threshold, measured);
        for listener in &self.listeners {
            listener(&event);
        }
        Some(event)
    }

    fn attach_listener(&mut self, listener: ThresholdListener) {
        self.listeners.push(listener);
    }
}
