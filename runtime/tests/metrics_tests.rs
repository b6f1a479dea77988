//! Consumer pool metrics, captured with a process-wide recorder.
//!
//! Kept in its own test binary because the recorder is global.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use metrics::{Counter, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use ticket_ingest_core::{PersistenceGateway, TicketQueue};
use ticket_ingest_runtime::ConsumerPool;
use ticket_ingest_testing::{InMemoryTicketQueue, InMemoryTicketStore, valid_ticket};
use tokio::sync::broadcast;

#[derive(Default)]
struct GaugeValue(Mutex<f64>);

impl GaugeFn for GaugeValue {
    fn increment(&self, value: f64) {
        *self.0.lock().unwrap() += value;
    }

    fn decrement(&self, value: f64) {
        *self.0.lock().unwrap() -= value;
    }

    fn set(&self, value: f64) {
        *self.0.lock().unwrap() = value;
    }
}

struct InFlightRecorder {
    in_flight: Arc<GaugeValue>,
}

impl Recorder for InFlightRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, _key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::noop()
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        if key.name() == "ticket_ingest_in_flight" {
            Gauge::from_arc(Arc::clone(&self.in_flight))
        } else {
            Gauge::noop()
        }
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

fn in_flight_gauge() -> Arc<GaugeValue> {
    static GAUGE: OnceLock<Arc<GaugeValue>> = OnceLock::new();
    Arc::clone(GAUGE.get_or_init(|| {
        let in_flight = Arc::new(GaugeValue::default());
        metrics::set_global_recorder(InFlightRecorder {
            in_flight: Arc::clone(&in_flight),
        })
        .expect("recorder already installed");
        in_flight
    }))
}

fn read(gauge: &GaugeValue) -> f64 {
    *gauge.0.lock().unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn in_flight_gauge_returns_to_zero_while_the_queue_is_idle() {
    let gauge = in_flight_gauge();
    let queue = InMemoryTicketQueue::new();
    let store = InMemoryTicketStore::new().with_write_delay(Duration::from_millis(100));
    let pool = ConsumerPool::new(PersistenceGateway::new(Arc::new(store.clone())), 4);

    queue.publish("tickets_queue", valid_ticket().as_bytes()).await.unwrap();
    let deliveries = queue.subscribe("tickets_queue").await.unwrap();

    let (shutdown_tx, mut shutdown) = broadcast::channel(1);
    let running = tokio::spawn(async move { pool.run(deliveries, &mut shutdown).await });

    wait_until(|| read(&gauge) >= 1.0).await;
    wait_until(|| queue.ack_count() == 1).await;

    // Stream stays open, so the dispatch loop is parked waiting for more.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.tickets().len(), 1);
    assert!(read(&gauge).abs() < f64::EPSILON, "in-flight gauge stuck at {}", read(&gauge));

    shutdown_tx.send(()).unwrap();
    let report = running.await.unwrap();
    assert_eq!(report.received, 1);
    assert_eq!(report.stored, 1);
    assert!(read(&gauge).abs() < f64::EPSILON);
}
