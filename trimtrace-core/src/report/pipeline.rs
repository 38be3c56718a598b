//! Producer/consumer pipeline between the path search and the output.
//!
//! The search pushes each [`PathResult`] into an unbounded channel; one
//! scoped consumer thread formats, tallies and writes chains as they
//! arrive. [`ReportMessage::Done`] is the end-of-stream sentinel, after
//! which the consumer flushes grouped output and hands back its state.

use std::io::{self, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tracing::debug;

use super::format::{FormattedChain, Formatter, Grouping};
use super::{Categorizer, ReportState};
use crate::error::{TrimtraceError, TrimtraceResult};
use crate::model::{Node, Program};
use crate::search::PathResult;

/// Message from the search to the report consumer.
#[derive(Debug)]
pub enum ReportMessage {
    Result(PathResult),
    /// No more results follow
    Done,
}

/// Writes chains to a sink as text or JSON.
///
/// Ungrouped JSON is streamed as one valid array; grouped output is
/// written in one go by [`ChainWriter::write_groups`].
pub struct ChainWriter<W: Write> {
    out: W,
    json: bool,
    grouping: Grouping,
    first: bool,
    started: bool,
}

impl<W: Write> ChainWriter<W> {
    pub fn new(out: W, json: bool, grouping: Grouping) -> Self {
        Self {
            out,
            json,
            grouping,
            first: true,
            started: false,
        }
    }

    pub fn grouping(&self) -> Grouping {
        self.grouping
    }

    fn begin(&mut self) -> io::Result<()> {
        if !self.started {
            self.started = true;
            if self.json && self.grouping == Grouping::None {
                writeln!(self.out, "[")?;
            }
        }
        Ok(())
    }

    fn write_one(&mut self, chain: &FormattedChain) -> io::Result<()> {
        if self.json {
            if !self.first {
                writeln!(self.out, ",")?;
            }
            self.first = false;
            write!(self.out, "{}", chain.as_json())
        } else {
            writeln!(self.out, "{}", chain.as_text())
        }
    }

    /// Stream one ungrouped chain.
    pub fn write_chain(&mut self, chain: &FormattedChain) -> io::Result<()> {
        self.begin()?;
        self.write_one(chain)
    }

    /// Write every group, largest first, under its group header.
    pub fn write_groups(
        &mut self,
        program: &Program,
        groups: &[(Node, Vec<FormattedChain>)],
    ) -> io::Result<()> {
        self.begin()?;
        if self.json {
            writeln!(self.out, "{{")?;
        }
        for (g, (key, chains)) in groups.iter().enumerate() {
            let name = program.display(*key);
            if self.json {
                if g > 0 {
                    writeln!(self.out, ",")?;
                }
                let quoted = serde_json::to_string(&name).map_err(io::Error::other)?;
                writeln!(self.out, "{quoted}: [")?;
            } else {
                writeln!(self.out, "---")?;
                writeln!(self.out, "--- chains for group: {name}")?;
                writeln!(self.out, "---")?;
            }
            self.first = true;
            for chain in chains {
                self.write_one(chain)?;
            }
            if self.json {
                write!(self.out, "\n]")?;
            }
        }
        if self.json {
            writeln!(self.out)?;
            writeln!(self.out, "}}")?;
        }
        Ok(())
    }

    /// Close any open JSON array, flush, and return the sink.
    pub fn finish(mut self) -> io::Result<W> {
        if self.json && self.grouping == Grouping::None {
            self.begin()?;
            if !self.first {
                writeln!(self.out)?;
            }
            writeln!(self.out, "]")?;
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

fn consume<W: Write>(
    rx: Receiver<ReportMessage>,
    formatter: &Formatter<'_>,
    categorizer: &Categorizer<'_>,
    mut state: ReportState,
    mut writer: ChainWriter<W>,
) -> TrimtraceResult<(ReportState, W)> {
    let program = formatter.program();
    let grouped = writer.grouping() != Grouping::None;

    for msg in rx {
        let result = match msg {
            ReportMessage::Result(r) => r,
            ReportMessage::Done => break,
        };
        for &dest in &result.destinations {
            let chain = formatter.format(&result, dest)?;
            let category = categorizer.categorize(&chain);
            if !grouped {
                writer.write_chain(&chain)?;
            }
            state.record(program, chain, category, result.source, dest);
        }
    }

    if grouped {
        let groups = state.take_groups();
        debug!(groups = groups.len(), "Writing grouped chains");
        writer.write_groups(program, &groups)?;
    }
    let out = writer.finish()?;
    Ok((state, out))
}

/// Run `produce` on the calling thread while a scoped consumer thread
/// formats and writes what it sends.
///
/// `produce` gets a sender it may clone freely (e.g. one per rayon worker).
/// Send failures only happen once the consumer has already failed, so
/// producers may ignore them; the consumer's error is what gets returned.
pub fn run_report_pipeline<W, P>(
    formatter: &Formatter<'_>,
    categorizer: &Categorizer<'_>,
    state: ReportState,
    writer: ChainWriter<W>,
    produce: P,
) -> TrimtraceResult<(ReportState, W)>
where
    W: Write + Send,
    P: FnOnce(Sender<ReportMessage>) -> TrimtraceResult<()>,
{
    let (tx, rx) = mpsc::channel();

    thread::scope(|s| {
        let consumer = s.spawn(move || consume(rx, formatter, categorizer, state, writer));

        let produced = produce(tx.clone());
        // The consumer may already be gone; its own error wins then.
        let _ = tx.send(ReportMessage::Done);
        drop(tx);

        let consumed = consumer
            .join()
            .map_err(|_| TrimtraceError::report("report consumer thread panicked"))?;
        produced?;
        consumed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Reason, SetClassifier};
    use crate::facts::FactRecorder;
    use crate::graph::{CompactGraph, DependencyGraph};
    use crate::model::MethodDef;
    use crate::search::{all_pairs_search, SearchConstraints};

    fn chain(lines: &[&str]) -> FormattedChain {
        FormattedChain {
            nodes: vec![],
            lines: lines.iter().map(|s| s.to_string()).collect(),
            reason: Some(Reason::new("R")),
        }
    }

    #[test]
    fn test_streamed_json_is_valid_array() {
        let mut w = ChainWriter::new(Vec::new(), true, Grouping::None);
        w.write_chain(&chain(&["a", "b"])).unwrap();
        w.write_chain(&chain(&["c"])).unwrap();
        let out = w.finish().unwrap();
        let v: Vec<Vec<String>> = serde_json::from_slice(&out).unwrap();
        assert_eq!(v, vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_empty_json_stream() {
        let w = ChainWriter::new(Vec::new(), true, Grouping::None);
        let out = w.finish().unwrap();
        let v: Vec<Vec<String>> = serde_json::from_slice(&out).unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn test_text_chains_separated_by_blank_line() {
        let mut w = ChainWriter::new(Vec::new(), false, Grouping::None);
        w.write_chain(&chain(&["a", "b"])).unwrap();
        w.write_chain(&chain(&["c"])).unwrap();
        let out = String::from_utf8(w.finish().unwrap()).unwrap();
        assert_eq!(out, "a\nb\n\nc\n\n");
    }

    /// Two interesting APIs, both reached from Main through Helper.
    fn fixture() -> (crate::model::Program, DependencyGraph, SetClassifier) {
        let mut rec = FactRecorder::new();
        let main = rec.method(MethodDef::new("App.Program", "Main"));
        let helper = rec.method(MethodDef::new("App.Program", "Helper"));
        let load = rec.method(MethodDef::new("System.Reflection.Assembly", "Load"));
        let get_type = rec.method(MethodDef::new("System.Type", "GetType"));
        rec.record_direct_call(main, helper);
        rec.record_direct_call(helper, load);
        rec.record_direct_call(helper, get_type);
        let (program, facts) = rec.into_parts();
        let graph = DependencyGraph::build(&program, &facts);
        let classifier = SetClassifier::new()
            .entry(main)
            .interesting(load, "AssemblyLoad")
            .interesting(get_type, "KnownReflection");
        (program, graph, classifier)
    }

    fn run(grouping: Grouping, json: bool) -> (ReportState, String) {
        let (program, graph, classifier) = fixture();
        let (compact, mapping) = CompactGraph::create_from(&graph, &program, &classifier).unwrap();
        let formatter = Formatter::new(&program, &graph, &compact, &mapping);
        let categorizer = Categorizer::new(&program, &[]);
        let state = ReportState::new(compact.num_nodes, grouping);
        let writer = ChainWriter::new(Vec::new(), json, grouping);

        let (state, out) = run_report_pipeline(&formatter, &categorizer, state, writer, |tx| {
            let c = SearchConstraints::new(&compact.is_interesting, &compact.is_entry);
            all_pairs_search(&compact.callers, &c, |r| {
                let _ = tx.send(ReportMessage::Result(r));
            });
            Ok(())
        })
        .unwrap();
        (state, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_pipeline_streams_every_chain() {
        let (state, out) = run(Grouping::None, true);
        assert_eq!(state.chain_count(), 2);
        let v: Vec<Vec<String>> = serde_json::from_str(&out).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[0][0], "---------- (AssemblyLoad)");
        assert_eq!(v[0][3], "App.Program::Main() -> System.Void");
    }

    #[test]
    fn test_pipeline_grouped_by_caller() {
        let (state, out) = run(Grouping::Caller, true);
        assert_eq!(state.chain_count(), 2);
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        let group = &v["App.Program::Main() -> System.Void"];
        assert_eq!(group.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_pipeline_grouped_text() {
        let (_, out) = run(Grouping::Callee, false);
        assert!(out.contains("--- chains for group: System.Type::GetType() -> System.Void\n"));
        assert!(out.contains("--- chains for group: System.Reflection.Assembly::Load() -> System.Void\n"));
    }

    #[test]
    fn test_producer_error_propagates() {
        let (program, graph, classifier) = fixture();
        let (compact, mapping) = CompactGraph::create_from(&graph, &program, &classifier).unwrap();
        let formatter = Formatter::new(&program, &graph, &compact, &mapping);
        let categorizer = Categorizer::new(&program, &[]);
        let state = ReportState::new(compact.num_nodes, Grouping::None);
        let writer = ChainWriter::new(Vec::new(), false, Grouping::None);

        let err = run_report_pipeline(&formatter, &categorizer, state, writer, |_tx| {
            Err(TrimtraceError::invariant("producer failed"))
        })
        .unwrap_err();
        assert!(matches!(err, TrimtraceError::Invariant { .. }));
    }
}
