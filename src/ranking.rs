use crate::error::{MirrorError, Result};
use crate::probe::Prober;
use crate::types::{Mirror, MirrorReport, MirrorStatistics, ProbeOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const NANOS_PER_SEC: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Probing { round: u32 },
    Aggregating,
    Ranked,
}

/// Rounds × mirrors grid of probe outcomes. Every cell has exactly one writer.
#[derive(Debug)]
struct SampleMatrix {
    width: usize,
    cells: Vec<Option<ProbeOutcome>>,
}

impl SampleMatrix {
    fn new(rounds: usize, width: usize) -> Self {
        Self {
            width,
            cells: vec![None; rounds * width],
        }
    }

    fn set(&mut self, round: usize, index: usize, outcome: ProbeOutcome) {
        let cell = &mut self.cells[round * self.width + index];
        debug_assert!(cell.is_none(), "sample [{}][{}] written twice", round, index);
        *cell = Some(outcome);
    }

    fn filled(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    fn len(&self) -> usize {
        self.cells.len()
    }

    /// All samples of one mirror, in round order.
    fn column(&self, index: usize) -> impl Iterator<Item = ProbeOutcome> + '_ {
        self.cells
            .iter()
            .skip(index)
            .step_by(self.width)
            .filter_map(|c| *c)
    }
}

/// Orchestration context of one ranking run. Not shared across runs.
#[derive(Debug)]
struct RankingRun {
    rounds: u32,
    mirrors: Vec<Mirror>,
    samples: SampleMatrix,
    statistics: Vec<MirrorStatistics>,
    completed_rounds: u32,
    state: RunState,
}

impl RankingRun {
    fn new(mirrors: Vec<Mirror>, rounds: u32) -> Self {
        let n = mirrors.len();
        Self {
            rounds,
            samples: SampleMatrix::new(rounds as usize, n),
            statistics: vec![MirrorStatistics::default(); n],
            mirrors,
            completed_rounds: 0,
            state: RunState::Idle,
        }
    }

    fn record(&mut self, round: u32, index: usize, outcome: ProbeOutcome) {
        debug_assert_eq!(self.state, RunState::Probing { round });
        self.samples.set(round as usize, index, outcome);
        self.statistics[index].last_response = outcome.duration();
    }

    /// Fold the sample matrix into averages. Fails unless every round ran to
    /// completion, so partial statistics never escape as final ones.
    fn finish(mut self) -> Result<Ranking> {
        self.state = RunState::Aggregating;

        let expected = self.samples.len();
        let filled = self.samples.filled();
        if self.completed_rounds != self.rounds || filled != expected {
            return Err(MirrorError::IncompleteRun { filled, expected });
        }

        for (index, stats) in self.statistics.iter_mut().enumerate() {
            let mut total: u128 = 0;
            let mut reached = false;
            let mut measurable = true;

            for outcome in self.samples.column(index) {
                match outcome {
                    ProbeOutcome::Reached(d) => {
                        reached = true;
                        total += d.as_nanos();
                    }
                    ProbeOutcome::Failed(d) => total += d.as_nanos(),
                    ProbeOutcome::Unsupported => measurable = false,
                }
            }

            if measurable {
                stats.avg_response = Some(duration_from_nanos(total / self.rounds as u128));
                stats.reachable = Some(reached);
            } else {
                stats.avg_response = None;
                stats.reachable = None;
            }
        }

        self.state = RunState::Ranked;
        debug!(state = ?self.state, mirrors = self.mirrors.len(), "run aggregated");

        Ok(Ranking {
            mirrors: self.mirrors,
            statistics: self.statistics,
            rounds: self.rounds,
        })
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    Duration::new(
        (nanos / NANOS_PER_SEC) as u64,
        (nanos % NANOS_PER_SEC) as u32,
    )
}

/// 排序引擎: 多轮并发测速, 按平均延迟排序
///
/// Each round launches one task per mirror and waits for all of them before
/// the next round starts. A slow mirror only delays its own round; every
/// probe enforces its own timeout.
pub struct RankingEngine<P> {
    prober: Arc<P>,
    rounds: u32,
    progress: bool,
}

impl<P: Prober + 'static> RankingEngine<P> {
    pub fn new(prober: P, rounds: u32) -> Result<Self> {
        if rounds == 0 {
            return Err(MirrorError::InvalidRounds(rounds));
        }
        Ok(Self {
            prober: Arc::new(prober),
            rounds,
            progress: false,
        })
    }

    /// Show a progress bar on stderr for each round.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Probe every mirror `rounds` times and compute the statistics.
    pub async fn run(&self, mirrors: Vec<Mirror>) -> Result<Ranking> {
        if mirrors.is_empty() {
            return Err(MirrorError::NoMirrors);
        }

        let mut run = RankingRun::new(mirrors, self.rounds);
        info!(mirrors = run.mirrors.len(), rounds = self.rounds, "ranking mirrors");

        for round in 0..self.rounds {
            self.probe_round(&mut run, round).await?;
        }

        run.finish()
    }

    async fn probe_round(&self, run: &mut RankingRun, round: u32) -> Result<()> {
        run.state = RunState::Probing { round };
        debug!(state = ?run.state, "round started");

        let pb = self.progress_bar(run.mirrors.len(), round);

        // 为每个镜像源生成一个异步任务, 结果写回各自的格子
        let tasks = run.mirrors.iter().cloned().enumerate().map(|(index, mirror)| {
            let prober = Arc::clone(&self.prober);
            let pb = pb.clone();
            tokio::spawn(async move {
                let outcome = prober.measure(&mirror).await;
                pb.inc(1);
                (index, outcome)
            })
        });

        // Barrier: the round is over only when every probe has reported
        let results = futures::future::join_all(tasks).await;
        pb.finish_and_clear();

        for result in results {
            let (index, outcome) = result?;
            run.record(round, index, outcome);
        }
        run.completed_rounds += 1;

        info!(round = round + 1, of = self.rounds, "round completed");
        Ok(())
    }

    fn progress_bar(&self, len: usize, round: u32) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("[{bar:40.cyan/blue}] {percent}% {msg}") {
            pb.set_style(style.progress_chars("|| "));
        }
        pb.set_message(format!("Round {}/{}", round + 1, self.rounds));
        pb
    }
}

/// Result of a completed run: mirrors in their original order and a
/// statistics table indexed by mirror position.
#[derive(Debug, Clone)]
pub struct Ranking {
    mirrors: Vec<Mirror>,
    statistics: Vec<MirrorStatistics>,
    rounds: u32,
}

impl Ranking {
    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn mirrors(&self) -> &[Mirror] {
        &self.mirrors
    }

    pub fn statistics(&self, index: usize) -> Option<&MirrorStatistics> {
        self.statistics.get(index)
    }

    /// Mirrors with their statistics, in current order.
    pub fn reports(&self) -> Vec<MirrorReport<'_>> {
        (0..self.len()).map(|i| self.report(i)).collect()
    }

    /// Ascending average response time. Mirrors without an average come
    /// last; ties keep their current relative order.
    pub fn rank(&self) -> Vec<MirrorReport<'_>> {
        self.order().into_iter().map(|i| self.report(i)).collect()
    }

    /// Reorder the mirrors in place, using the same ordering as [`Ranking::rank`].
    pub fn sort(&mut self) {
        let order = self.order();
        let mut slots: Vec<Option<(Mirror, MirrorStatistics)>> = self
            .mirrors
            .drain(..)
            .zip(self.statistics.drain(..))
            .map(Some)
            .collect();

        for index in order {
            if let Some((mirror, stats)) = slots[index].take() {
                self.mirrors.push(mirror);
                self.statistics.push(stats);
            }
        }
    }

    /// Mirror with the lowest average among those that answered at least
    /// once, or `None` when no mirror was reachable.
    pub fn best(&self) -> Option<MirrorReport<'_>> {
        self.statistics
            .iter()
            .enumerate()
            .filter(|(_, s)| s.reachable == Some(true))
            .filter_map(|(i, s)| s.avg_response.map(|avg| (i, avg)))
            .min_by_key(|&(_, avg)| avg)
            .map(|(i, _)| self.report(i))
    }

    fn order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        // sort_by_key is stable
        order.sort_by_key(|&i| match self.statistics[i].avg_response {
            Some(avg) => (false, avg),
            None => (true, Duration::ZERO),
        });
        order
    }

    fn report(&self, index: usize) -> MirrorReport<'_> {
        MirrorReport {
            mirror: &self.mirrors[index],
            statistics: &self.statistics[index],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::NetworkProber;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn mirror(name: &str) -> Mirror {
        Mirror::new(&format!("http://{}.mirror.test/ubuntu/", name)).unwrap()
    }

    /// Replays fixed outcomes per URL, one per round. Unknown URLs are unsupported.
    struct ScriptedProber {
        script: Mutex<HashMap<String, VecDeque<ProbeOutcome>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(entries: Vec<(&Mirror, Vec<ProbeOutcome>)>) -> Self {
            let script = entries
                .into_iter()
                .map(|(m, outcomes)| (m.url().to_string(), outcomes.into()))
                .collect();
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        fn reached(entries: Vec<(&Mirror, Vec<u64>)>) -> Self {
            Self::new(
                entries
                    .into_iter()
                    .map(|(m, times)| {
                        (m, times.into_iter().map(|t| ProbeOutcome::Reached(ms(t))).collect())
                    })
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn measure(&self, mirror: &Mirror) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            script
                .get_mut(mirror.url().as_str())
                .and_then(|q| q.pop_front())
                .unwrap_or(ProbeOutcome::Unsupported)
        }
    }

    fn urls(reports: &[MirrorReport<'_>]) -> Vec<String> {
        reports.iter().map(|r| r.mirror.url().to_string()).collect()
    }

    #[tokio::test]
    async fn test_single_round_ranks_by_latency() -> Result<()> {
        let (a, b, c) = (mirror("a"), mirror("b"), mirror("c"));
        let prober = ScriptedProber::reached(vec![(&a, vec![10]), (&b, vec![5]), (&c, vec![7])]);

        let ranking = RankingEngine::new(prober, 1)?
            .run(vec![a.clone(), b.clone(), c.clone()])
            .await?;

        assert_eq!(
            urls(&ranking.rank()),
            vec![b.url().to_string(), c.url().to_string(), a.url().to_string()]
        );
        assert_eq!(ranking.best().map(|r| r.mirror.clone()), Some(b));
        // caller order untouched
        assert_eq!(ranking.mirrors()[0], a);
        Ok(())
    }

    #[tokio::test]
    async fn test_average_over_rounds() -> Result<()> {
        let a = mirror("a");
        let prober = ScriptedProber::reached(vec![(&a, vec![10, 20, 30])]);
        let engine = RankingEngine::new(prober, 3)?;

        let ranking = engine.run(vec![a]).await?;
        let stats = ranking.statistics(0).unwrap();

        assert_eq!(stats.avg_response, Some(ms(20)));
        assert_eq!(stats.last_response, ms(30));
        assert_eq!(stats.reachable, Some(true));
        assert_eq!(engine.prober.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_samples_count_raw_elapsed() -> Result<()> {
        let (a, b) = (mirror("a"), mirror("b"));
        let prober = ScriptedProber::new(vec![
            (&a, vec![ProbeOutcome::Failed(ms(7000)), ProbeOutcome::Failed(ms(7000))]),
            (&b, vec![ProbeOutcome::Reached(ms(900)), ProbeOutcome::Failed(ms(7000))]),
        ]);

        let ranking = RankingEngine::new(prober, 2)?.run(vec![a, b.clone()]).await?;

        assert_eq!(ranking.statistics(0).unwrap().avg_response, Some(ms(7000)));
        assert_eq!(ranking.statistics(0).unwrap().reachable, Some(false));
        assert_eq!(ranking.statistics(1).unwrap().avg_response, Some(ms(3950)));
        assert_eq!(ranking.statistics(1).unwrap().reachable, Some(true));
        assert_eq!(ranking.best().map(|r| r.mirror.clone()), Some(b));
        Ok(())
    }

    #[tokio::test]
    async fn test_average_does_not_overflow() -> Result<()> {
        let a = mirror("a");
        let huge = Duration::new(u64::MAX, 999_999_999);
        let prober = ScriptedProber::new(vec![(
            &a,
            vec![ProbeOutcome::Failed(huge), ProbeOutcome::Failed(huge)],
        )]);

        let ranking = RankingEngine::new(prober, 2)?.run(vec![a]).await?;
        assert_eq!(ranking.statistics(0).unwrap().avg_response, Some(huge));
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_ranks_last() -> Result<()> {
        let rsync = Mirror::new("rsync://a.mirror.test/ubuntu/")?;
        let (slow, fast) = (mirror("slow"), mirror("fast"));
        let prober = ScriptedProber::new(vec![
            (&slow, vec![ProbeOutcome::Failed(ms(7000))]),
            (&fast, vec![ProbeOutcome::Reached(ms(40))]),
        ]);

        let ranking = RankingEngine::new(prober, 1)?
            .run(vec![rsync.clone(), slow.clone(), fast.clone()])
            .await?;

        let ranked = ranking.rank();
        assert_eq!(ranked[2].mirror, &rsync);
        assert_eq!(ranked[2].statistics.avg_response, None);
        assert_eq!(ranked[2].statistics.reachable, None);
        assert_eq!(ranked[2].statistics.last_response, Duration::MAX);
        assert_eq!(ranked[0].mirror, &fast);
        Ok(())
    }

    #[tokio::test]
    async fn test_rsync_ranks_after_unreachable_mirror() -> Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let refused = Mirror::new(&format!("http://127.0.0.1:{}/", port))?;
        let rsync = Mirror::new("rsync://mirror.invalid/debian/")?;

        let ranking = RankingEngine::new(NetworkProber::new(ms(2000))?, 1)?
            .run(vec![rsync.clone(), refused.clone()])
            .await?;

        let ranked = ranking.rank();
        assert_eq!(ranked[0].mirror, &refused);
        assert_eq!(ranked[1].mirror, &rsync);
        Ok(())
    }

    #[tokio::test]
    async fn test_best_without_reachable_mirror() -> Result<()> {
        let rsync = Mirror::new("rsync://a.mirror.test/arch/")?;
        let ftp_unknown = mirror("unscripted");

        let ranking = RankingEngine::new(ScriptedProber::new(vec![]), 1)?
            .run(vec![rsync, ftp_unknown])
            .await?;

        assert!(ranking.best().is_none());
        assert_eq!(ranking.rank().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_best_ignores_mirrors_that_always_failed() -> Result<()> {
        let (refused, timed_out) = (mirror("refused"), mirror("timeout"));
        let prober = ScriptedProber::new(vec![
            (&refused, vec![ProbeOutcome::Failed(Duration::from_micros(470))]),
            (&timed_out, vec![ProbeOutcome::Failed(ms(7000))]),
        ]);

        let ranking = RankingEngine::new(prober, 1)?
            .run(vec![refused.clone(), timed_out])
            .await?;

        assert!(ranking.best().is_none());
        // still ranked by raw elapsed time
        assert_eq!(ranking.rank()[0].mirror, &refused);
        Ok(())
    }

    #[tokio::test]
    async fn test_best_prefers_answering_mirror_over_fast_failure() -> Result<()> {
        let (refused, slow) = (mirror("refused"), mirror("slow"));
        let prober = ScriptedProber::new(vec![
            (&refused, vec![ProbeOutcome::Failed(ms(1)), ProbeOutcome::Failed(ms(1))]),
            (&slow, vec![ProbeOutcome::Failed(ms(7000)), ProbeOutcome::Reached(ms(800))]),
        ]);

        let ranking = RankingEngine::new(prober, 2)?
            .run(vec![refused, slow.clone()])
            .await?;

        let best = ranking.best().map(|r| r.mirror.clone());
        assert_eq!(best, Some(slow));
        Ok(())
    }

    #[tokio::test]
    async fn test_best_is_none_for_refused_connections() -> Result<()> {
        let mut mirrors = Vec::new();
        for _ in 0..2 {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
            let port = listener.local_addr()?.port();
            drop(listener);
            mirrors.push(Mirror::new(&format!("http://127.0.0.1:{}/", port))?);
        }

        let client = reqwest::Client::builder()
            .timeout(ms(2000))
            .no_proxy()
            .build()
            .unwrap_or_default();
        let ranking = RankingEngine::new(NetworkProber::with_client(client, ms(2000)), 1)?
            .run(mirrors)
            .await?;

        assert!(ranking.best().is_none());
        assert_eq!(ranking.statistics(0).unwrap().reachable, Some(false));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_bad_preconditions() -> Result<()> {
        assert!(matches!(
            RankingEngine::new(ScriptedProber::new(vec![]), 0),
            Err(MirrorError::InvalidRounds(0))
        ));

        let engine = RankingEngine::new(ScriptedProber::new(vec![]), 1)?;
        assert!(matches!(engine.run(vec![]).await, Err(MirrorError::NoMirrors)));
        assert_eq!(engine.prober.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_ties_keep_original_order_and_rank_is_idempotent() -> Result<()> {
        let mirrors: Vec<Mirror> = ["a", "b", "c", "d"].iter().map(|n| mirror(n)).collect();
        let prober = ScriptedProber::reached(vec![
            (&mirrors[0], vec![9]),
            (&mirrors[1], vec![3]),
            (&mirrors[2], vec![9]),
            (&mirrors[3], vec![3]),
        ]);

        let mut ranking = RankingEngine::new(prober, 1)?.run(mirrors.clone()).await?;

        let first = urls(&ranking.rank());
        let expected: Vec<String> = [1, 3, 0, 2]
            .iter()
            .map(|&i| mirrors[i].url().to_string())
            .collect();
        assert_eq!(first, expected);
        assert_eq!(urls(&ranking.rank()), first);
        assert_eq!(ranking.best().map(|r| r.mirror.clone()), Some(mirrors[1].clone()));

        ranking.sort();
        assert_eq!(urls(&ranking.reports()), expected);
        assert_eq!(ranking.statistics(0).unwrap().avg_response, Some(ms(3)));
        ranking.sort();
        assert_eq!(urls(&ranking.reports()), expected);
        Ok(())
    }

    /// Sleeps a per-mirror delay so completion order differs from launch order.
    struct DelayProber {
        delays: HashMap<String, Duration>,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl Prober for DelayProber {
        async fn measure(&self, mirror: &Mirror) -> ProbeOutcome {
            let delay = self.delays[mirror.url().as_str()];
            tokio::time::sleep(delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            ProbeOutcome::Reached(delay)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fan_out_waits_for_every_probe() -> Result<()> {
        let mirrors: Vec<Mirror> = (0..50).map(|i| mirror(&format!("m{}", i))).collect();
        let delays = mirrors
            .iter()
            .enumerate()
            .map(|(i, m)| (m.url().to_string(), ms(((i * 37) % 50) as u64 + 1)))
            .collect();
        let engine = RankingEngine::new(
            DelayProber {
                delays,
                finished: AtomicUsize::new(0),
            },
            2,
        )?;

        let ranking = engine.run(mirrors.clone()).await?;

        assert_eq!(engine.prober.finished.load(Ordering::SeqCst), 100);
        for (i, m) in ranking.mirrors().iter().enumerate() {
            let expected = ms(((i * 37) % 50) as u64 + 1);
            let stats = ranking.statistics(i).unwrap();
            assert_eq!(m, &mirrors[i]);
            assert_eq!(stats.last_response, expected);
            assert_eq!(stats.avg_response, Some(expected));
        }

        let ranked = ranking.rank();
        for pair in ranked.windows(2) {
            assert!(pair[0].statistics.avg_response <= pair[1].statistics.avg_response);
        }
        Ok(())
    }

    #[test]
    fn test_incomplete_run_is_not_reported() {
        let mut run = RankingRun::new(vec![mirror("a"), mirror("b")], 2);
        run.state = RunState::Probing { round: 0 };
        run.record(0, 0, ProbeOutcome::Reached(ms(5)));
        run.record(0, 1, ProbeOutcome::Reached(ms(6)));
        run.completed_rounds = 1;

        assert!(matches!(
            run.finish(),
            Err(MirrorError::IncompleteRun {
                filled: 2,
                expected: 4
            })
        ));
    }

    #[test]
    fn test_sample_matrix_columns() {
        let mut samples = SampleMatrix::new(3, 2);
        for round in 0..3 {
            samples.set(round, 0, ProbeOutcome::Reached(ms(round as u64)));
            samples.set(round, 1, ProbeOutcome::Failed(ms(10 + round as u64)));
        }

        assert_eq!(samples.filled(), 6);
        let col: Vec<_> = samples.column(1).collect();
        assert_eq!(
            col,
            vec![
                ProbeOutcome::Failed(ms(10)),
                ProbeOutcome::Failed(ms(11)),
                ProbeOutcome::Failed(ms(12))
            ]
        );
    }
}
