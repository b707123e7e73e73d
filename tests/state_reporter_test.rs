// Behavioural suite for the reason reporter: one line per transition,
// dominant-reason collapse, idempotence and conservation.

use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, Mutex};

use captusb::reporter::ReasonReporter;
use captusb::status::{BasicStatus, ControllerStatus, EngineStatus, StatusWord};

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn take(&self) -> String {
        let mut buf = self.0.lock().unwrap();
        String::from_utf8(std::mem::take(&mut buf)).unwrap()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Replays emitted lines into a reason set, asserting protocol sanity:
/// no duplicate raises, no spurious lowers, no unknown lines.
#[derive(Default)]
struct StateParser {
    reasons: HashSet<String>,
    page: u32,
}

impl StateParser {
    fn parse(&mut self, output: &str) {
        for line in output.lines() {
            if let Some(rest) = line.strip_prefix("STATE: +") {
                assert!(
                    self.reasons.insert(rest.to_owned()),
                    "reason {rest} raised twice"
                );
            } else if let Some(rest) = line.strip_prefix("STATE: -") {
                assert!(
                    self.reasons.remove(rest),
                    "reason {rest} lowered while not raised"
                );
            } else if let Some(rest) = line.strip_prefix("PAGE: page-number ") {
                self.page = rest.parse().expect("page number");
            } else {
                panic!("failed to parse line: {line}");
            }
        }
    }
}

struct Fixture {
    sink: SharedSink,
    parser: StateParser,
    reporter: ReasonReporter,
}

impl Fixture {
    fn new() -> Self {
        let sink = SharedSink::default();
        Self {
            reporter: ReasonReporter::new(sink.clone()),
            parser: StateParser::default(),
            sink,
        }
    }

    fn update(&mut self, status: StatusWord) {
        self.reporter.update(status);
        self.parser.parse(&self.sink.take());
    }

    fn reasons(&self) -> Vec<&str> {
        let mut reasons: Vec<&str> = self.parser.reasons.iter().map(String::as_str).collect();
        reasons.sort_unstable();
        reasons
    }
}

fn engine(bits: EngineStatus) -> StatusWord {
    StatusWord {
        engine: bits,
        ..StatusWord::default()
    }
}

fn basic(bits: BasicStatus) -> StatusWord {
    StatusWord {
        basic: bits,
        ..StatusWord::default()
    }
}

#[test]
fn page_reports() {
    let mut f = Fixture::new();
    f.reporter.page(1);
    f.parser.parse(&f.sink.take());
    assert_eq!(f.parser.page, 1);
    assert!(f.parser.reasons.is_empty());

    f.reporter.page(123);
    f.parser.parse(&f.sink.take());
    assert_eq!(f.parser.page, 123);
}

#[test]
fn single_conditions_map_to_reasons() {
    let cases: Vec<(StatusWord, Vec<&str>)> = vec![
        (StatusWord::default(), vec![]),
        (basic(BasicStatus::CMD_BUSY), vec!["unknown-error"]),
        (basic(BasicStatus::ERROR_BIT), vec!["unknown-error"]),
        (
            StatusWord {
                controller: ControllerStatus::ENGINE_RESET_IN_PROGRESS,
                ..StatusWord::default()
            },
            vec!["resuming"],
        ),
        (engine(EngineStatus::WAITING), vec!["resuming"]),
        (engine(EngineStatus::DOOR_OPEN), vec!["door-open-error"]),
        (engine(EngineStatus::NO_CARTRIDGE), vec!["toner-empty-error"]),
        (
            engine(EngineStatus::NO_PRINT_PAPER),
            vec!["media-empty-error", "media-needed-error"],
        ),
        (engine(EngineStatus::JAM), vec!["media-jam-error"]),
        (engine(EngineStatus::SERVICE_CALL), vec!["other-error"]),
    ];
    for (status, expected) in cases {
        let mut f = Fixture::new();
        f.update(status);
        assert_eq!(f.reasons(), expected, "for {status:?}");
    }
}

#[test]
fn update_is_idempotent() {
    let statuses = [
        engine(EngineStatus::JAM | EngineStatus::NO_PRINT_PAPER),
        engine(EngineStatus::SERVICE_CALL),
        basic(BasicStatus::ERROR_BIT),
    ];
    for status in statuses {
        let mut f = Fixture::new();
        f.update(status);
        f.reporter.update(status);
        assert_eq!(f.sink.take(), "", "second update for {status:?} emitted");
    }
}

#[test]
fn clear_lowers_everything_it_raised() {
    let mut f = Fixture::new();
    f.update(engine(EngineStatus::NO_PRINT_PAPER));
    assert_eq!(f.reasons(), ["media-empty-error", "media-needed-error"]);

    f.reporter.clear();
    f.parser.parse(&f.sink.take());
    assert!(f.parser.reasons.is_empty());
}

#[test]
fn drop_clears_remaining_reasons() {
    let sink = SharedSink::default();
    let mut reporter = ReasonReporter::new(sink.clone());
    reporter.update(engine(EngineStatus::JAM));
    drop(reporter);

    let mut parser = StateParser::default();
    parser.parse(&sink.take());
    assert!(parser.reasons.is_empty());
}

#[test]
fn combined_conditions_raise_all_reasons() {
    let mut f = Fixture::new();
    f.update(engine(EngineStatus::NO_PRINT_PAPER | EngineStatus::JAM));
    assert_eq!(
        f.reasons(),
        ["media-empty-error", "media-jam-error", "media-needed-error"]
    );

    f.update(StatusWord::default());
    assert!(f.parser.reasons.is_empty());
}

#[test]
fn service_call_dominates_everything() {
    let mut f = Fixture::new();
    f.update(basic(BasicStatus::CMD_BUSY));
    assert_eq!(f.reasons(), ["unknown-error"]);

    let mut fatal_paper = engine(EngineStatus::NO_PRINT_PAPER);
    fatal_paper.basic = BasicStatus::ERROR_BIT;
    f.update(fatal_paper);
    assert_eq!(f.reasons(), ["unknown-error"]);

    let mut service = engine(EngineStatus::SERVICE_CALL | EngineStatus::JAM);
    service.basic = BasicStatus::ERROR_BIT;
    f.update(service);
    assert_eq!(f.reasons(), ["other-error"]);

    // Back to an ordinary jam once the dominant condition clears.
    f.update(engine(EngineStatus::JAM));
    assert_eq!(f.reasons(), ["media-jam-error"]);

    f.update(engine(EngineStatus::SERVICE_CALL | EngineStatus::JAM));
    assert_eq!(f.reasons(), ["other-error"]);
}
