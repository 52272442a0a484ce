use std::collections::VecDeque;

use hashbrown::HashSet;

use crate::config::{RouterConfig, RoutingMode, Widths};
use crate::error::RouterError;
use crate::host::{Board, BoardLookup, Layer, LayerVisibility, RouterHost, Signals};
use crate::StableState;

use super::nets::collect_edges;
use super::pass::{CycleResult, RoutePass};
use super::ripup::{fingerprint, reorder_edges};
use super::trace::RoutingTrace;
use super::types::{Edge, EdgeResult, OrderingScore, RoutingOutcome, RoutingReport};

/// Routes every open connection of a design, retrying with new edge
/// orderings until one routes cleanly, the orderings run out or the cycle
/// limit is reached.
pub struct EdgeRouter {
    config: RouterConfig,
    signals: Signals,
}

/// The best ordering seen so far and the design state it left behind.
struct Best<C> {
    score: OrderingScore,
    results: Vec<EdgeResult>,
    checkpoint: C,
}

impl EdgeRouter {
    pub fn new(config: RouterConfig, signals: Signals) -> Self {
        EdgeRouter { config, signals }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Routes the design held by `host`.
    ///
    /// Fails without touching the design when there is no single board (in
    /// PCB mode), nothing to route, or parts and traces overlap. A cancelled
    /// run restores the design as it was and reports
    /// [`RoutingOutcome::Cancelled`].
    #[tracing::instrument(skip_all, fields(mode = ?self.config.mode))]
    pub fn route<H: RouterHost>(&self, host: &mut H) -> Result<RoutingReport, RouterError> {
        self.config.validate()?;
        let board = match (self.config.mode, host.board()) {
            (RoutingMode::Schematic, _) => None,
            (RoutingMode::Pcb, BoardLookup::Single(board)) => Some(board),
            (RoutingMode::Pcb, BoardLookup::Missing) => return Err(RouterError::NoBoard),
            (RoutingMode::Pcb, BoardLookup::Multiple) => return Err(RouterError::MultipleBoards),
        };

        let layers: &[Layer] = match self.config.mode {
            RoutingMode::Pcb if self.config.both_layers => &Layer::ALL,
            _ => &[Layer::Bottom],
        };
        if self.config.mode == RoutingMode::Pcb {
            host.show_layers(if self.config.both_layers {
                LayerVisibility::Both
            } else {
                LayerVisibility::Only(Layer::Bottom)
            });
        }

        let (edges, off_board_parts) = collect_edges(&*host, self.config.mode, board.as_ref(), layers);
        if edges.is_empty() {
            tracing::info!("no connections to route");
            return Err(RouterError::NoConnections);
        }

        let narrowest = edges
            .iter()
            .flat_map(|e| [e.from, e.to])
            .filter_map(|c| host.connector(c))
            .map(|c| c.min_dimension())
            .fold(f64::INFINITY, f64::min);
        let width = self.config.fitted_trace_width(narrowest);
        if width != self.config.trace_width {
            tracing::info!(width, "narrow connectors, using a thinner trace width");
        }
        tracing::info!(edges = edges.len(), off_board_parts, "routing");

        let original = host.checkpoint();
        let mut trace = self.config.trace_json.as_ref().map(|_| RoutingTrace::new(&edges));
        let run = self.run_cycles(host, &original, board.as_ref(), layers, &edges, Widths::new(width), trace.as_mut());
        let (outcome, results, cycles) = match run {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(error = %e, "routing failed, restoring the design");
                host.rollback(&original);
                return Err(e);
            }
        };

        let report = report(outcome, &results, cycles, off_board_parts);
        tracing::info!(?report.outcome, report.routed, report.unrouted, report.jumpers, report.vias, "routing done");
        if let (Some(trace), Some(path)) = (trace, self.config.trace_json.as_ref()) {
            trace.write(path, &report)?;
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_cycles<H: RouterHost>(
        &self,
        host: &mut H,
        original: &H::Checkpoint,
        board: Option<&Board>,
        layers: &[Layer],
        edges: &[Edge],
        widths: Widths,
        mut trace: Option<&mut RoutingTrace>,
    ) -> Result<(RoutingOutcome, Vec<EdgeResult>, usize), RouterError> {
        let first: Vec<usize> = (0..edges.len()).collect();
        let mut seen: HashSet<u64, StableState> = HashSet::default();
        seen.insert(fingerprint(&first));
        let mut orderings = VecDeque::from([first]);
        let mut best: Option<Best<H::Checkpoint>> = None;
        let mut cycles = 0;

        while cycles < self.config.max_cycles {
            let Some(order) = orderings.pop_front() else {
                tracing::debug!("no untried orderings left");
                break;
            };
            if cycles > 0 {
                host.rollback(original);
            }
            let _span = tracing::info_span!("cycle", cycle = cycles).entered();

            let result = {
                let mut pass = RoutePass::new(&mut *host, &self.config, &self.signals, board, layers, widths)?;
                pass.run_edges(edges, &order, best.as_ref().map(|b| b.score), cycles)?
            };
            cycles += 1;
            let better = best.as_ref().map_or(true, |b| result.score < b.score);
            tracing::info!(?result.score, better, all_done = result.all_done, "cycle done");
            if let Some(trace) = trace.as_deref_mut() {
                trace.record_cycle(cycles - 1, &order, &result, better);
            }

            if self.signals.is_cancelled() {
                tracing::info!("cancelled, restoring the design");
                host.rollback(original);
                return Ok((RoutingOutcome::Cancelled, vec![EdgeResult::default(); edges.len()], cycles));
            }
            if result.all_done {
                return Ok((RoutingOutcome::Completed, result.results, cycles));
            }
            if self.signals.is_stopped() {
                return Ok(match best {
                    Some(b) if !better => {
                        host.rollback(&b.checkpoint);
                        (RoutingOutcome::Stopped, b.results, cycles)
                    }
                    _ => (RoutingOutcome::Stopped, result.results, cycles),
                });
            }

            let CycleResult { results, score, traces, .. } = result;
            if let Some(next) = reorder_edges(edges, &order, &results, &traces, widths.real) {
                if seen.insert(fingerprint(&next)) {
                    orderings.push_back(next);
                }
            }
            if better {
                best = Some(Best {
                    score,
                    results,
                    checkpoint: host.checkpoint(),
                });
            }
        }

        match best {
            Some(b) => {
                host.rollback(&b.checkpoint);
                Ok((RoutingOutcome::BestEffort, b.results, cycles))
            }
            None => {
                host.rollback(original);
                Ok((RoutingOutcome::BestEffort, vec![EdgeResult::default(); edges.len()], cycles))
            }
        }
    }
}

fn report(outcome: RoutingOutcome, results: &[EdgeResult], cycles: usize, off_board_parts: usize) -> RoutingReport {
    let routed = results.iter().filter(|r| r.routed).count();
    let unrouted = results.len() - routed;
    let jumpers = results.iter().filter(|r| r.with_jumper).count();
    let vias: usize = results.iter().map(|r| r.vias).sum();

    let mut message = match outcome {
        RoutingOutcome::Cancelled => "Routing cancelled".to_string(),
        _ if unrouted > 0 => format!("{unrouted} of {} connections could not be routed", results.len()),
        _ if jumpers > 0 => format!("Routing completed using {jumpers} jumper part(s)"),
        _ => "Routing completed".to_string(),
    };
    if off_board_parts > 0 {
        message.push_str(&format!(
            "\n\nNote: the autorouter did not route {off_board_parts} parts, because they are not located entirely on the board."
        ));
    }

    RoutingReport {
        outcome,
        routed,
        unrouted,
        jumpers,
        vias,
        cycles,
        off_board_parts,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn results(routed: usize, unrouted: usize, jumpers: usize) -> Vec<EdgeResult> {
        let mut all = vec![
            EdgeResult {
                routed: true,
                ..Default::default()
            };
            routed
        ];
        for r in all.iter_mut().take(jumpers) {
            r.with_jumper = true;
        }
        all.extend(vec![EdgeResult::default(); unrouted]);
        all
    }

    #[rstest]
    #[case(results(3, 0, 0), "Routing completed")]
    #[case(results(3, 0, 1), "Routing completed using 1 jumper part(s)")]
    #[case(results(2, 1, 0), "1 of 3 connections could not be routed")]
    fn report_message_names_what_is_left(#[case] results: Vec<EdgeResult>, #[case] message: &str) {
        let report = report(RoutingOutcome::BestEffort, &results, 2, 0);
        assert_eq!(report.message, message);
        assert_eq!(report.routed + report.unrouted, 3);
    }

    #[test]
    fn off_board_parts_are_mentioned() {
        let report = report(RoutingOutcome::Completed, &results(1, 0, 0), 1, 2);
        assert!(report.message.ends_with("did not route 2 parts, because they are not located entirely on the board."));
    }
}
