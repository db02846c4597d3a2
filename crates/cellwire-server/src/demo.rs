//! A receiver-like control tree to serve when no application is attached.
//!
//! Shape of the root:
//!
//! | key | cell |
//! |-----|------|
//! | `freq` | stored, writable, Range |
//! | `mode` | stored, writable, Enum |
//! | `gain` | getter/setter pair over simulated hardware |
//! | `squelch` | stored, writable, Quantity in dB |
//! | `notice` | stored, read-only Notice set by the gain setter |
//! | `clock` | polled Timestamp |
//! | `channels` | reference to a dynamic collection of channels |
//! | `events` | append-only log |
//! | `spectrum` | bulk data, produced only while observed |

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cellwire_core::types::{BulkDataT, EnumT, Range, TypeDefinitionError, Unit, ValueType};
use cellwire_core::{
    BlockRef, BulkChunk, Cadence, CellEvent, CellMetadata, CellValue, CollectionState,
    InterestTracker, Poller, ReferenceCell, SharedCollection, StateError, StateNode, StreamCell,
    Subscription, SubscriptionContext, ValueCell, callback,
};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub const SPECTRUM_BINS: usize = 256;
const EVENT_HISTORY: usize = 100;
const HIGH_GAIN_DB: f64 = 40.0;
const DEFAULT_FREQ: f64 = 100e6;

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn event(message: impl Into<String>) -> Value {
    json!({"time": now_seconds(), "message": message.into()})
}

/// The demo tree and the tasks feeding it.
pub struct Demo {
    root: BlockRef,
    freq: ValueCell,
    events: StreamCell,
    spectrum: StreamCell,
    spectrum_interest: InterestTracker,
    spectrum_task: Option<JoinHandle<()>>,
    _mode_log: Subscription,
}

impl Demo {
    pub fn new(poller: &Poller) -> Result<Self, TypeDefinitionError> {
        let band = Range::new([(24e6, 1_766e6)])?;
        let freq = ValueCell::stored(
            CellMetadata::new(band)
                .writable()
                .with_label("Frequency")
                .with_sort_key("0"),
            json!(DEFAULT_FREQ),
        );
        let mode = ValueCell::stored(
            CellMetadata::new(EnumT::from_labels([
                ("AM", "AM"),
                ("NFM", "Narrow FM"),
                ("WFM", "Broadcast FM"),
                ("USB", "Upper sideband"),
                ("LSB", "Lower sideband"),
            ])?)
            .writable()
            .with_label("Mode")
            .with_sort_key("1"),
            json!("WFM"),
        );
        let squelch = ValueCell::stored(
            CellMetadata::new(ValueType::Quantity(Unit::decibel()))
                .writable()
                .with_label("Squelch"),
            json!(-100.0),
        );
        let notice = ValueCell::stored(
            CellMetadata::new(ValueType::Notice {
                always_visible: false,
            }),
            json!(""),
        );
        let events = StreamCell::log(
            CellMetadata::new(ValueType::Any).with_label("Events"),
            Some(EVENT_HISTORY),
        );

        let gain = gain_cell(Range::new([(0.0, 50.0)])?, notice.clone(), events.clone());
        let clock = ValueCell::polled(
            CellMetadata::new(ValueType::Timestamp).with_label("Server time"),
            || Ok(json!(chrono::Utc::now().timestamp() as f64)),
        );

        let channels = channel_collection(events.clone())?;
        let spectrum_interest = InterestTracker::new();
        let spectrum = StreamCell::bulk(BulkDataT::new("dd", "b")?)
            .with_interest(spectrum_interest.clone());

        let log = events.clone();
        let (_, mode_log) = mode.subscribe(
            callback(move |change| {
                if let CellEvent::Changed(CellValue::Value(Value::String(mode))) = change {
                    log.append(vec![event(format!("mode changed to {mode}"))]);
                }
            }),
            &SubscriptionContext::new(poller.clone(), Cadence::Slow),
        );

        let root = StateNode::builder()
            .cell("freq", freq.clone())
            .cell("mode", mode)
            .cell("gain", gain)
            .cell("squelch", squelch)
            .cell("notice", notice)
            .cell("clock", clock)
            .cell(
                "channels",
                ReferenceCell::fixed(CellMetadata::reference().with_label("Channels"), channels),
            )
            .cell("events", events.clone())
            .cell("spectrum", spectrum.clone())
            .interface("receiver")
            .into_block();

        Ok(Self {
            root,
            freq,
            events,
            spectrum,
            spectrum_interest,
            spectrum_task: None,
            _mode_log: mode_log,
        })
    }

    pub fn root(&self) -> &BlockRef {
        &self.root
    }

    pub fn events(&self) -> &StreamCell {
        &self.events
    }

    pub fn spectrum_interest(&self) -> &InterestTracker {
        &self.spectrum_interest
    }

    /// Start producing spectrum frames every `interval` while observed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, interval: Duration) {
        if self.spectrum_task.is_some() {
            return;
        }
        info!(interval_ms = interval.as_millis(), "demo spectrum producer started");
        self.spectrum_task = Some(tokio::spawn(produce_spectrum(
            self.spectrum.clone(),
            self.freq.clone(),
            self.spectrum_interest.clone(),
            interval,
        )));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.spectrum_task.take() {
            task.abort();
        }
    }
}

impl Drop for Demo {
    fn drop(&mut self) {
        self.stop();
    }
}

fn gain_cell(range: Range, notice: ValueCell, events: StreamCell) -> ValueCell {
    let hardware = Arc::new(AtomicU64::new(20.0_f64.to_bits()));
    let read = Arc::clone(&hardware);
    ValueCell::polled_with_setter(
        CellMetadata::new(range).with_label("RF gain"),
        move || Ok(json!(f64::from_bits(read.load(Ordering::Relaxed)))),
        move |value| {
            let gain = value.as_f64().unwrap_or_default();
            hardware.store(gain.to_bits(), Ordering::Relaxed);
            let warning = if gain > HIGH_GAIN_DB {
                "High gain may overload the receiver."
            } else {
                ""
            };
            notice.set_internal(&json!(warning))?;
            events.append(vec![event(format!("gain set to {gain} dB"))]);
            Ok(())
        },
    )
}

/// A channel as created by the collection: an offset and a name.
fn channel(key: &str) -> Result<BlockRef, TypeDefinitionError> {
    Ok(StateNode::builder()
        .cell(
            "offset",
            ValueCell::stored(
                CellMetadata::new(Range::new([(-1.2e6, 1.2e6)])?)
                    .writable()
                    .with_label("Offset"),
                json!(0.0),
            ),
        )
        .cell(
            "name",
            ValueCell::stored(CellMetadata::new(ValueType::Text).writable(), json!(key)),
        )
        .into_block())
}

fn channel_collection(events: StreamCell) -> Result<BlockRef, TypeDefinitionError> {
    let members = SharedCollection::default();
    members
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert("main".to_string(), channel("main")?);
    let view = CollectionState::new(members).with_inserter(move |key, _description| {
        let block = channel(key).map_err(|err| StateError::Insert {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        events.append(vec![event(format!("channel {key} added"))]);
        Ok(block)
    });
    Ok(BlockRef::new(view))
}

async fn produce_spectrum(
    cell: StreamCell,
    freq: ValueCell,
    interest: InterestTracker,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut phase = 0;
    loop {
        if !interest.is_interested() {
            debug!("spectrum idle");
            interest.interested().await;
            ticker.reset();
        }
        ticker.tick().await;
        if !interest.is_interested() {
            continue;
        }
        let centre = freq.get().ok().and_then(|v| v.as_f64()).unwrap_or(DEFAULT_FREQ);
        cell.push_chunk(synthetic_spectrum(centre, phase));
        phase = (phase + 1) % SPECTRUM_BINS;
    }
}

/// A noise floor with one carrier drifting across the band.
fn synthetic_spectrum(centre: f64, phase: usize) -> BulkChunk {
    let data: Vec<u8> = (0..SPECTRUM_BINS)
        .map(|bin| {
            let distance = (bin as f64 - phase as f64) / 6.0;
            let level = -110.0 + 70.0 * (-distance * distance).exp();
            (level.round() as i8).to_le_bytes()[0]
        })
        .collect();
    BulkChunk::new(vec![centre, now_seconds()], data)
}

#[cfg(test)]
mod tests {
    use cellwire_core::{PollerConfig, StateJson};

    use super::*;

    fn demo() -> Demo {
        Demo::new(&Poller::manual(PollerConfig::default())).unwrap()
    }

    #[test]
    fn snapshot_holds_persistent_cells_only() {
        let demo = demo();
        let snapshot = Value::Object(demo.root().state_to_json());
        assert_eq!(snapshot["freq"], json!(100e6));
        assert_eq!(snapshot["mode"], json!("WFM"));
        assert_eq!(snapshot["gain"], json!(20.0));
        assert_eq!(snapshot["channels"]["main"]["name"], json!("main"));
        assert!(snapshot.get("notice").is_none());
        assert!(snapshot.get("clock").is_none());
        assert!(snapshot.get("events").is_none());
    }

    #[test]
    fn high_gain_raises_notice_and_logs() {
        let demo = demo();
        let state = demo.root().state();
        state["gain"].set(&json!(45)).unwrap();

        assert_eq!(
            state["notice"].get().unwrap(),
            CellValue::Value(json!("High gain may overload the receiver."))
        );
        let log = demo.events().get();
        assert_eq!(log[0]["message"], json!("gain set to 45 dB"));
    }

    #[test]
    fn mode_changes_are_logged() {
        let demo = demo();
        demo.root().state()["mode"].set(&json!("AM")).unwrap();
        assert_eq!(demo.events().get()[0]["message"], json!("mode changed to AM"));
    }

    #[test]
    fn restore_creates_missing_channels() {
        let demo = demo();
        let report = demo.root().state_from_json(
            json!({"channels": {"aux": {"offset": 25e3}}})
                .as_object()
                .unwrap(),
        );
        assert_eq!(report.applied, vec!["channels/aux/offset".to_string()]);
        let snapshot = Value::Object(demo.root().state_to_json());
        assert_eq!(snapshot["channels"]["aux"]["offset"], json!(25e3));
        assert_eq!(demo.events().get()[0]["message"], json!("channel aux added"));
    }

    #[test]
    fn spectrum_frames_match_declared_shape() {
        let chunk = synthetic_spectrum(1e6, 10);
        assert_eq!(chunk.info, vec![1e6, chunk.info[1]]);
        assert_eq!(chunk.data.len(), SPECTRUM_BINS);
        assert_eq!(chunk.data[10] as i8, -40);
        assert_eq!(chunk.data[200] as i8, -110);
    }

    #[tokio::test(start_paused = true)]
    async fn spectrum_is_only_produced_while_observed() {
        let mut demo = demo();
        demo.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(350)).await;
        let spectrum = demo.root().state()["spectrum"].clone();
        let cellwire_core::Cell::Stream(stream) = spectrum else {
            panic!("spectrum is a stream cell");
        };
        assert!(stream.latest_chunk().is_none());

        let guard = demo.spectrum_interest().acquire();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(stream.latest_chunk().is_some());
        drop(guard);
        demo.stop();
    }
}
