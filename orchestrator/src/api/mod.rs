use std::convert::Infallible;
use std::sync::Arc;

use uuid::Uuid;
use warp::{Filter, Rejection, Reply};

use crate::agents::AgentRegistry;
use crate::error::handle_rejection;
use crate::events::{EventPerceiver, EventProcessor};
use crate::messages::MessageLog;
use crate::metrics::Metrics;
use crate::tasks::TaskQueue;

mod events;
mod messages;
mod status;
mod tasks;

/// Everything the handlers need; cloned into each request.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub messages: MessageLog,
    pub tasks: TaskQueue,
    pub perceiver: EventPerceiver,
    pub processor: EventProcessor,
    pub metrics: Arc<Metrics>,
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .and_then(status::handle_health);

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(status::handle_metrics);

    health
        .or(metrics)
        .or(api_routes(state))
        .recover(handle_rejection)
        .with(cors())
        .with(warp::log("api"))
}

fn api_routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let record_event = warp::path!("api" / "v1" / "events")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(events::handle_record);

    let send_message = warp::path!("api" / "v1" / "messages")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(messages::handle_send);

    let list_agents = warp::path!("api" / "v1" / "agents")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(status::handle_agents);

    let list_messages = warp::path!("api" / "v1" / "agents" / String / "messages")
        .and(warp::get())
        .and(warp::query())
        .and(with_state(state.clone()))
        .and_then(messages::handle_list);

    let respond = warp::path!("api" / "v1" / "messages" / Uuid / "respond")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(messages::handle_respond);

    let create_task = warp::path!("api" / "v1" / "tasks")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(tasks::handle_create);

    let list_tasks = warp::path!("api" / "v1" / "tasks")
        .and(warp::get())
        .and(warp::query())
        .and(with_state(state.clone()))
        .and_then(tasks::handle_list);

    let get_task = warp::path!("api" / "v1" / "tasks" / Uuid)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(tasks::handle_get);

    let report_task = warp::path!("api" / "v1" / "tasks" / Uuid / "report")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(tasks::handle_report);

    let retry_task = warp::path!("api" / "v1" / "tasks" / Uuid / "retry")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(tasks::handle_retry);

    let stats = warp::path!("api" / "v1" / "stats")
        .and(warp::get())
        .and(with_state(state))
        .and_then(status::handle_stats);

    record_event
        .or(send_message)
        .or(list_agents)
        .or(list_messages)
        .or(respond)
        .or(create_task)
        .or(list_tasks)
        .or(get_task)
        .or(report_task)
        .or(retry_task)
        .or(stats)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["Content-Type", "Authorization", "Accept"])
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
}
