mod config;
mod errors;
mod execution;
mod models;
mod state;
mod worker;

use crate::errors::EngineResult;
use crate::models::barrier::AbsorbingBarrierModel;
use crate::models::volatility::VolatilityEngine;
use crate::models::HitModel;
use crate::state::{HostMessage, OddsRecord, OddsRequest, WorkerState};
use crate::worker::{OddsWorker, PendingBatch};
use portable_atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries only responses
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("tap_odds engine starting");

    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        step_ms = cfg.estimator.step_ms,
        grid = ?cfg.estimator.grid_sizing,
        house_edge = cfg.odds.house_edge,
        budget_ms = cfg.batch_budget.map(|b| b.as_millis() as u64),
        "config loaded"
    );

    let model: Arc<dyn HitModel> = Arc::new(AbsorbingBarrierModel::new(cfg.estimator));
    let (worker, worker_handle) = OddsWorker::spawn(model, &cfg);
    let mut vol_engine = VolatilityEngine::new(cfg.vol_ewma_lambda, cfg.estimator.step_ms);

    // Responses are written by their own task, in request order, so stdin
    // stays readable (and a cancel can get through) while a batch computes.
    let (resp_tx, resp_rx) = mpsc::channel::<Response>(cfg.worker_queue.max(1));
    let writer = tokio::spawn(write_responses(resp_rx, tokio::io::stdout()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("stdin read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match handle_line(&line, &worker, &mut vol_engine).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "rejected message");
                Some(Response::Ready(Vec::new()))
            }
        };

        if let Some(response) = response {
            if resp_tx.send(response).await.is_err() {
                tracing::error!("response writer stopped");
                break;
            }
        }
    }

    drop(resp_tx);
    if let Err(e) = writer.await {
        tracing::error!("response writer task error: {e}");
    }

    let counters = worker.counters();
    tracing::info!(
        completed = counters.batches_completed.load(Ordering::Relaxed),
        failed = counters.batches_failed.load(Ordering::Relaxed),
        truncated = counters.batches_truncated.load(Ordering::Relaxed),
        cells = counters.cells_evaluated.load(Ordering::Relaxed),
        "input closed, shutting down"
    );

    drop(worker);
    if let Err(e) = worker_handle.await {
        tracing::error!("worker task error: {e}");
    }
}

/// One line owed to stdout.
#[derive(Debug)]
enum Response {
    Ready(Vec<OddsRecord>),
    Pending(PendingBatch),
}

impl Response {
    async fn into_records(self) -> Vec<OddsRecord> {
        match self {
            Response::Ready(records) => records,
            Response::Pending(pending) => match pending.outcome().await {
                Ok(outcome) => outcome.into_wire(),
                Err(e) => {
                    tracing::error!(error = %e, "batch reply lost");
                    Vec::new()
                }
            },
        }
    }
}

/// Handle one input line. `None` means the message needs no response.
async fn handle_line(
    line: &str,
    worker: &OddsWorker,
    vol_engine: &mut VolatilityEngine,
) -> EngineResult<Option<Response>> {
    match serde_json::from_str::<HostMessage>(line)? {
        HostMessage::Price { price, timestamp_ms } => {
            vol_engine.update(price, timestamp_ms);
            Ok(None)
        }
        HostMessage::Odds(request) => {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let Some(request) = prepare_request(request, vol_engine, now_ms) else {
                tracing::warn!(
                    samples = vol_engine.sample_count(),
                    "no volatility supplied and estimate not ready"
                );
                return Ok(Some(Response::Ready(Vec::new())));
            };
            let pending = worker.submit(request).await?;
            Ok(Some(Response::Pending(pending)))
        }
        HostMessage::Cancel => {
            match worker.state() {
                WorkerState::Computing => {
                    tracing::info!("cancelling running batch");
                    worker.cancel();
                }
                state => tracing::debug!(%state, "cancel ignored, no batch running"),
            }
            Ok(None)
        }
    }
}

/// Drain responses in order and write one JSON array per line.
async fn write_responses<W>(mut rx: mpsc::Receiver<Response>, mut out: W)
where
    W: AsyncWriteExt + Unpin,
{
    while let Some(response) = rx.recv().await {
        let records = response.into_records().await;
        if let Err(e) = write_response(&mut out, &records).await {
            tracing::error!("stdout write error: {e}");
            break;
        }
    }
}

/// Fill in the clock and volatility the caller left out.
/// Returns `None` when volatility is missing and no estimate is ready yet.
fn prepare_request(
    mut request: OddsRequest,
    vol_engine: &VolatilityEngine,
    now_ms: i64,
) -> Option<OddsRequest> {
    if request.init_time.is_none() {
        request.init_time = Some(now_ms);
    }
    if request.volatility.is_none() {
        if !vol_engine.is_ready() {
            return None;
        }
        request.volatility = Some(vol_engine.per_step_sigma());
    }
    Some(request)
}

async fn write_response<W>(out: &mut W, records: &[OddsRecord]) -> EngineResult<()>
where
    W: AsyncWriteExt + Unpin,
{
    let mut json = serde_json::to_string(records)?;
    json.push('\n');
    out.write_all(json.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::time::Duration;

    fn request(volatility: Option<f64>, init_time: Option<i64>) -> OddsRequest {
        OddsRequest {
            time_ticks: vec![1_000.0],
            time_gap: 500.0,
            price_ticks: vec![100.0],
            price_gap: 0.5,
            init_price: 100.0,
            init_time,
            volatility,
        }
    }

    fn warmed_engine() -> VolatilityEngine {
        let mut v = VolatilityEngine::new(0.94, 500);
        let up = 0.001_f64.exp();
        let mut price = 100.0;
        for i in 0..40 {
            v.update(price, i * 500);
            price = if i % 2 == 0 { price * up } else { price / up };
        }
        v
    }

    #[test]
    fn test_prepare_keeps_caller_values() {
        let req = prepare_request(request(Some(0.002), Some(7)), &warmed_engine(), 99).unwrap();
        assert_eq!(req.volatility, Some(0.002));
        assert_eq!(req.init_time, Some(7));
    }

    #[test]
    fn test_prepare_fills_clock_and_estimate() {
        let req = prepare_request(request(None, None), &warmed_engine(), 99).unwrap();
        assert_eq!(req.init_time, Some(99));
        let sigma = req.volatility.unwrap();
        assert!((sigma - 0.001).abs() < 1e-5, "sigma={sigma}");
    }

    #[test]
    fn test_prepare_without_estimate() {
        let cold = VolatilityEngine::new(0.94, 500);
        assert!(prepare_request(request(None, Some(0)), &cold, 0).is_none());
    }

    async fn collect_records(response: Option<Response>) -> Vec<OddsRecord> {
        response.expect("message should produce a response").into_records().await
    }

    #[tokio::test]
    async fn test_handle_line_round_trip() {
        let model: Arc<dyn HitModel> = Arc::new(AbsorbingBarrierModel::new(Default::default()));
        let (worker, _handle) = OddsWorker::spawn(model, &AppConfig::default());
        let mut vol = VolatilityEngine::new(0.94, 500);

        let price = r#"{"type":"price","price":100.0,"timestampMs":0}"#;
        assert!(handle_line(price, &worker, &mut vol).await.unwrap().is_none());

        let odds = r#"{"type":"odds","timeTicks":[1000,2000],"timeGap":1000,"priceTicks":[99.5,100.5],"priceGap":0.5,"initPrice":100,"initTime":0,"volatility":0.001}"#;
        let records = collect_records(handle_line(odds, &worker, &mut vol).await.unwrap()).await;
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.odds >= 1.02));

        assert!(handle_line("not json", &worker, &mut vol).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_message_reaches_running_batch() {
        let config = AppConfig { batch_budget: None, ..AppConfig::default() };
        let model: Arc<dyn HitModel> = Arc::new(AbsorbingBarrierModel::new(config.estimator));
        let (worker, _handle) = OddsWorker::spawn(model, &config);
        let mut vol = VolatilityEngine::new(0.94, 500);

        // 20-minute cells at 0.1% vol, each takes a while
        let ticks: Vec<String> = (0..40).map(|i| format!("{}", 100.0 + i as f64 * 0.1)).collect();
        let odds = format!(
            r#"{{"type":"odds","timeTicks":[600000],"timeGap":600000,"priceTicks":[{}],"priceGap":0.1,"initPrice":100,"initTime":0,"volatility":0.001}}"#,
            ticks.join(",")
        );
        let pending = handle_line(&odds, &worker, &mut vol).await.unwrap();

        // The host keeps reading while the batch computes
        tokio::time::timeout(Duration::from_secs(5), async {
            while worker.state() != WorkerState::Computing {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("batch never started");
        let cancel = r#"{"type":"cancel"}"#;
        assert!(handle_line(cancel, &worker, &mut vol).await.unwrap().is_none());

        let records = collect_records(pending).await;
        assert!(records.len() < 40, "cancel had no effect: {} records", records.len());
        assert_eq!(worker.counters().batches_truncated.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_ignored() {
        let model: Arc<dyn HitModel> = Arc::new(AbsorbingBarrierModel::new(Default::default()));
        let (worker, _handle) = OddsWorker::spawn(model, &AppConfig::default());
        let mut vol = VolatilityEngine::new(0.94, 500);

        assert!(handle_line(r#"{"type":"cancel"}"#, &worker, &mut vol).await.unwrap().is_none());

        let odds = r#"{"type":"odds","timeTicks":[1000],"timeGap":1000,"priceTicks":[100],"priceGap":0.5,"initPrice":100,"initTime":0,"volatility":0.001}"#;
        let records = collect_records(handle_line(odds, &worker, &mut vol).await.unwrap()).await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_writer_keeps_request_order() {
        let model: Arc<dyn HitModel> = Arc::new(AbsorbingBarrierModel::new(Default::default()));
        let (worker, _handle) = OddsWorker::spawn(model, &AppConfig::default());
        let mut vol = VolatilityEngine::new(0.94, 500);

        let (tx, rx) = mpsc::channel(8);
        let odds = r#"{"type":"odds","timeTicks":[1000],"timeGap":1000,"priceTicks":[100],"priceGap":0.5,"initPrice":100,"initTime":0,"volatility":0.001}"#;
        tx.send(handle_line(odds, &worker, &mut vol).await.unwrap().unwrap()).await.unwrap();
        tx.send(Response::Ready(Vec::new())).await.unwrap();
        drop(tx);

        let mut buf: Vec<u8> = Vec::new();
        write_responses(rx, &mut buf).await;
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[{\"price\":100.0,\"time\":1000.0,\"hit\":"), "got {}", lines[0]);
        assert_eq!(lines[1], "[]");
    }

    #[tokio::test]
    async fn test_write_response_is_one_line() {
        let mut buf: Vec<u8> = Vec::new();
        let records = [OddsRecord { price: 100.0, time: 1_000.0, odds: 2.5 }];
        write_response(&mut buf, &records).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "[{\"price\":100.0,\"time\":1000.0,\"hit\":2.5}]\n");
    }
}
