//! Demo scenarios run between a main and a worker node.

use std::sync::Arc;

use channel_config_and_utils::Config;
use channel_protocol_types::{
    Query, QueryExpression, Record, RecordIdentity, RecordOperation, Transform,
};
use channel_source::{
    BroadcastHub, ChannelSource, HookArgs, HookEvent, MemoryStore, Pullable, Pushable,
    Queryable, SourceConfig, SourceError, SourceResult, SourceStats, Updatable,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

/// Two activated nodes sharing one in-process hub.
struct DemoNetwork {
    main: ChannelSource,
    worker: ChannelSource,
    main_store: Arc<MemoryStore>,
    worker_store: Arc<MemoryStore>,
}

impl DemoNetwork {
    fn start(config: &Config) -> Self {
        let hub = BroadcastHub::new();
        let source_config = SourceConfig {
            channel_name: config.channel_name.clone(),
            request_timeout: config.request_timeout(),
        };

        let main_store = Arc::new(MemoryStore::new());
        let worker_store = Arc::new(MemoryStore::new());
        let main = ChannelSource::new(source_config.clone(), hub.clone(), main_store.clone());
        let worker = ChannelSource::new(source_config, hub, worker_store.clone());
        main.activate();
        worker.activate();

        info!(channel = %config.channel_name, "Demo nodes started");
        Self {
            main,
            worker,
            main_store,
            worker_store,
        }
    }

    async fn stop(&self) {
        self.main.deactivate().await;
        self.worker.deactivate().await;
    }

    async fn node_reports(&self) -> (NodeReport, NodeReport) {
        (
            NodeReport::collect(&self.main, &self.main_store).await,
            NodeReport::collect(&self.worker, &self.worker_store).await,
        )
    }
}

#[derive(Serialize)]
struct NodeReport {
    stats: SourceStats,
    transform_log: Vec<String>,
    records: usize,
}

impl NodeReport {
    async fn collect(source: &ChannelSource, store: &MemoryStore) -> Self {
        Self {
            stats: source.stats(),
            transform_log: store.transform_log().await,
            records: store.record_count().await,
        }
    }
}

#[derive(Serialize)]
struct ExchangeReport {
    push: Option<Value>,
    update: Option<Value>,
    pull: Option<Value>,
    query: Value,
    main: NodeReport,
    worker: NodeReport,
}

fn planet(id: &str, name: Option<&str>) -> Record {
    let record = Record::new("planet", id);
    match name {
        Some(name) => record.with_attribute("name", json!(name)),
        None => record,
    }
}

fn add_planet(id: &str, name: Option<&str>) -> Transform {
    Transform::new(vec![RecordOperation::AddRecord {
        record: planet(id, name),
    }])
}

/// Replicate, push, update, pull and query from main to worker.
pub async fn run_exchange(config: &Config) -> SourceResult<()> {
    let net = DemoNetwork::start(config);

    net.main.replicate(add_planet("earth", Some("Earth"))).await?;
    let push = net.main.push(add_planet("mars", Some("Mars"))).await?;
    let update = net
        .main
        .update(Transform::new(vec![RecordOperation::ReplaceAttribute {
            record: RecordIdentity::new("planet", "mars"),
            attribute: "moons".into(),
            value: json!(2),
        }]))
        .await?;
    let pull = net
        .main
        .pull(Query::new(QueryExpression::FindRecord {
            record: RecordIdentity::new("planet", "mars"),
        }))
        .await?;
    let query = net
        .main
        .query(Query::new(QueryExpression::FindRecords {
            record_type: "planet".into(),
        }))
        .await?;

    let (main, worker) = net.node_reports().await;
    net.stop().await;

    print_report(&ExchangeReport {
        push,
        update,
        pull,
        query,
        main,
        worker,
    })
}

/// Rejects added planets that have no name.
async fn require_planet_name(args: HookArgs) -> SourceResult<Option<Value>> {
    let Some(transform) = args.subject.transform() else {
        return Ok(None);
    };
    for operation in &transform.operations {
        if let RecordOperation::AddRecord { record } = operation {
            if !record.attributes.contains_key("name") {
                return Err(SourceError::listener(format!(
                    "ValidationFailed: planet {} has no name",
                    record.id
                )));
            }
        }
    }
    Ok(None)
}

#[derive(Serialize)]
struct RejectionReport {
    rejected: Option<String>,
    accepted: Option<Value>,
    worker: NodeReport,
}

/// Push one invalid and one valid transform through a validating worker.
pub async fn run_rejection(config: &Config) -> SourceResult<()> {
    let net = DemoNetwork::start(config);
    net.worker
        .listeners()
        .on(HookEvent::BeforeWrite, require_planet_name);

    let rejected = match net.main.push(add_planet("unnamed", None)).await {
        Ok(_) => None,
        Err(e) => Some(e.to_string()),
    };
    let accepted = net.main.push(add_planet("venus", Some("Venus"))).await?;

    let (_, worker) = net.node_reports().await;
    net.stop().await;

    print_report(&RejectionReport {
        rejected,
        accepted,
        worker,
    })
}

fn print_report(report: &impl Serialize) -> SourceResult<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
