//! Component wiring.
//!
//! Builds the full pipeline: bus sources feed the station supervisor,
//! accepted hits flow through the coincidence filter into the event
//! fan-out, and the side paths (pair analyzer, summaries, triggers,
//! cluster log) end in their configured sinks. Every sink is owned here;
//! consumers only hold non-owning `Arc<dyn Sink<_>>` references.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use cluster_core::analysis::{
    CoincidenceConfig, CoincidenceFilter, PairEvent, PairHistograms, PairHistogramsConfig,
};
use cluster_core::pipeline::PeriodicWorker;
use cluster_core::supervision::{
    ClusterMetrics, StateSupervisor, StationDirectory, StationMessage, StationSupervisor,
    StationSupervisorConfig,
};
use cluster_core::{
    ClusterLog, CollectionSink, DetectorInfo, DetectorLog, DetectorSummary, DetectorTrigger,
    Event, MapSink, RawHit, ShutdownToken, Sink, ThreadedSink, WorkerHandle,
};

use crate::config::Config;
use crate::link::Bus;
use crate::sink::{
    AsciiSink, BusClusterLogSink, BusDetectorLogSink, BusEventSink, BusSummarySink,
    BusTriggerSink, DatabaseLink, DatabaseSink, TriggerFileSink,
};
use crate::source::{HitSource, LogSource};

/// Worker wake-up granularity; periodic stage work is paced internally.
const TICK: Duration = Duration::from_millis(250);

pub fn run(
    config: &Config,
    debug: bool,
    source_bus: Arc<dyn Bus>,
    sink_bus: Arc<dyn Bus>,
    stop: &ShutdownToken,
) -> Result<Vec<WorkerHandle>> {
    let mut workers = Vec::new();
    let metrics = ClusterMetrics::new();
    let directory = StationDirectory::default();

    // Outgoing fan-out.
    let mut event_collection: CollectionSink<Event> = CollectionSink::new();
    let mut clusterlog_collection: CollectionSink<ClusterLog> = CollectionSink::new();
    let mut summary_collection: CollectionSink<DetectorSummary> = CollectionSink::new();
    let mut trigger_collection: CollectionSink<DetectorTrigger> = CollectionSink::new();
    let mut detectorlog_collection: CollectionSink<DetectorLog> = CollectionSink::new();

    if debug {
        event_collection.push(Arc::new(AsciiSink::new(std::io::stdout())));
        clusterlog_collection.push(Arc::new(AsciiSink::new(std::io::stdout())));
        summary_collection.push(Arc::new(AsciiSink::new(std::io::stdout())));
    }

    trigger_collection.push(Arc::new(BusTriggerSink::new(
        sink_bus.clone(),
        "muonpi/trigger",
    )));
    trigger_collection.push(Arc::new(TriggerFileSink::new(
        config.trigger.save_file.clone(),
    )));

    if config.run_local_cluster {
        // A local cluster republishes its products for the next
        // aggregation layer instead of writing to the database.
        event_collection.push(Arc::new(BusEventSink::new(
            sink_bus.clone(),
            "muonpi/l1data",
            true,
            config.max_geohash_length,
        )));
        clusterlog_collection.push(Arc::new(BusClusterLogSink::new(
            sink_bus.clone(),
            "muonpi/cluster",
        )));
        summary_collection.push(Arc::new(BusSummarySink::new(
            sink_bus.clone(),
            "muonpi/cluster",
        )));
        detectorlog_collection.push(Arc::new(BusDetectorLogSink::new(
            sink_bus.clone(),
            "muonpi/log",
        )));
    } else {
        let (database, database_worker) =
            DatabaseLink::spawn(config.database.clone(), stop.clone());
        workers.push(database_worker);

        event_collection.push(Arc::new(DatabaseSink::<Event>::new(database.clone())));
        clusterlog_collection.push(Arc::new(DatabaseSink::<ClusterLog>::new(database.clone())));
        summary_collection.push(Arc::new(DatabaseSink::<DetectorSummary>::new(
            database.clone(),
        )));
        detectorlog_collection.push(Arc::new(DatabaseSink::<DetectorLog>::new(database)));

        event_collection.push(Arc::new(BusEventSink::new(
            sink_bus.clone(),
            "muonpi/events",
            false,
            config.max_geohash_length,
        )));
    }

    let event_sink: Arc<dyn Sink<Event>> = Arc::new(event_collection);
    let clusterlog_sink: Arc<dyn Sink<ClusterLog>> = Arc::new(clusterlog_collection);
    let summary_sink: Arc<dyn Sink<DetectorSummary>> = Arc::new(summary_collection);
    let trigger_sink: Arc<dyn Sink<DetectorTrigger>> = Arc::new(trigger_collection);
    let detectorlog_sink: Arc<dyn Sink<DetectorLog>> = Arc::new(detectorlog_collection);

    // Station-coincidence analyzer, restoring the previous dump.
    let mut analyzer = PairHistograms::new(PairHistogramsConfig {
        data_directory: config.data_directory.clone(),
        sample_interval: Duration::from_secs(config.intervals.histogram_sample_time_s),
        save_interval: Duration::from_secs(config.intervals.histogram_save_s),
        ..Default::default()
    });
    match analyzer.load() {
        Ok(true) => {}
        Ok(false) => info!("no station coincidence dump found, starting empty"),
        Err(e) => warn!("could not restore station coincidence data: {e}"),
    }
    let (pair_sink, pair_worker) =
        ThreadedSink::spawn("station_coincidence", TICK, stop.clone(), analyzer);
    workers.push(pair_worker);

    // Coincidence filter; its timebase handle feeds the cluster log.
    let filter = CoincidenceFilter::new(
        event_sink,
        metrics.clone(),
        CoincidenceConfig::default(),
    );
    let timebase = filter.timebase().handle();
    let (hit_sink, filter_worker) =
        ThreadedSink::spawn("coincidence", TICK, stop.clone(), filter);
    workers.push(filter_worker);

    // Station supervisor with its two sink capabilities.
    let supervisor = StationSupervisor::new(
        directory.clone(),
        hit_sink.clone() as Arc<dyn Sink<_>>,
        pair_sink.clone() as Arc<dyn Sink<PairEvent>>,
        summary_sink,
        trigger_sink,
        metrics.clone(),
        StationSupervisorConfig {
            summary_interval: config.summary_interval(),
            ..Default::default()
        },
    );
    let (station_sink, station_worker) =
        ThreadedSink::spawn("station_supervisor", TICK, stop.clone(), supervisor);
    workers.push(station_worker);

    metrics.register_queue(station_sink.probe());
    metrics.register_queue(hit_sink.probe());
    metrics.register_queue(pair_sink.probe());

    let station_messages = station_sink as Arc<dyn Sink<StationMessage>>;
    let raw_hit_sink: Arc<dyn Sink<RawHit>> = Arc::new(MapSink::new(
        station_messages.clone(),
        StationMessage::Hit,
    ));
    let info_sink: Arc<dyn Sink<DetectorInfo>> =
        Arc::new(MapSink::new(station_messages, StationMessage::Info));

    // State supervisor: periodic cluster-log emission.
    let mut state = StateSupervisor::new(metrics, timebase, clusterlog_sink);
    workers.push(PeriodicWorker::spawn(
        "state_supervisor",
        config.cluster_log_interval(),
        stop.clone(),
        move || state.step(),
    ));

    // Bus subscriptions.
    workers.push(HitSource::spawn(
        &source_bus,
        "muonpi/data/#",
        raw_hit_sink.clone(),
        stop.clone(),
    ));
    workers.push(HitSource::spawn(
        &source_bus,
        "muonpi/l1data/#",
        raw_hit_sink,
        stop.clone(),
    ));
    workers.push(LogSource::spawn(
        &source_bus,
        "muonpi/log/#",
        info_sink,
        detectorlog_sink,
        stop.clone(),
    ));

    info!(
        workers = workers.len(),
        local_cluster = config.run_local_cluster,
        "cluster pipeline started"
    );
    Ok(workers)
}
