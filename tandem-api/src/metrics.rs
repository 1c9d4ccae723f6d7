use axum::{extract::State, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::state::AppState;

pub struct Metrics {
    registry: Registry,
    transitions: IntCounterVec,
    certifications: IntCounterVec,
    pub releases: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let transitions = IntCounterVec::new(
            Opts::new("booking_transitions_total", "Booking state transitions"),
            &["transition"],
        )
        .unwrap();
        let certifications = IntCounterVec::new(
            Opts::new("certifications_total", "Certification outcomes"),
            &["outcome"],
        )
        .unwrap();
        let releases = IntCounter::new(
            "settlement_releases_total",
            "Escrow releases credited to instructors",
        )
        .unwrap();
        registry.register(Box::new(transitions.clone())).unwrap();
        registry.register(Box::new(certifications.clone())).unwrap();
        registry.register(Box::new(releases.clone())).unwrap();
        Self {
            registry,
            transitions,
            certifications,
            releases,
        }
    }

    pub fn transition(&self, name: &str) {
        self.transitions.with_label_values(&[name]).inc();
    }

    pub fn certification(&self, outcome: &str) {
        self.certifications.with_label_values(&[outcome]).inc();
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(render_metrics))
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}
