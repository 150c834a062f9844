// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server and connection handling.

use std::future::Future;

use ork_adapters::RunClient;
use ork_core::{Clock, Job, RunId, Subject};
use tokio::net::UnixStream;
use tracing::{debug, error, info};

use crate::lifecycle::DaemonState;
use crate::protocol::{self, Request, Response, DEFAULT_TIMEOUT, PROTOCOL_VERSION};

/// Subject for requests arriving on the control socket
const OPERATOR: &str = "orkd";

/// Accept connections until a `Shutdown` request arrives or `stop`
/// completes
pub async fn serve(daemon: &mut DaemonState, stop: impl Future<Output = ()>) {
    tokio::pin!(stop);
    loop {
        tokio::select! {
            result = daemon.listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        if let Err(e) = handle_connection(daemon, stream).await {
                            error!(error = %e, "error handling connection");
                        }
                    }
                    Err(e) => error!(error = %e, "error accepting connection"),
                }
            }
            _ = &mut stop => return,
        }

        if daemon.shutdown_requested {
            info!("shutdown requested via socket");
            return;
        }
    }
}

/// Handle a single client connection
pub async fn handle_connection(
    daemon: &mut DaemonState,
    stream: UnixStream,
) -> Result<(), ServerError> {
    let (mut reader, mut writer) = stream.into_split();

    let request = match protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await {
        Ok(req) => req,
        Err(protocol::ProtocolError::Timeout) => {
            error!("request read timeout");
            return Err(ServerError::Timeout);
        }
        Err(protocol::ProtocolError::ConnectionClosed) => {
            debug!("client disconnected before sending request");
            return Ok(());
        }
        Err(e) => {
            error!(error = %e, "failed to read request");
            return Err(ServerError::Protocol(e));
        }
    };

    debug!(?request, "received request");
    let response = handle_request(daemon, request).await;
    debug!(?response, "sending response");

    protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT)
        .await
        .map_err(ServerError::Protocol)?;

    Ok(())
}

/// Handle a single request and return a response
pub async fn handle_request(daemon: &mut DaemonState, request: Request) -> Response {
    let operator = Subject::Operator(OPERATOR.to_string());
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version: _ } => Response::Hello {
            version: PROTOCOL_VERSION.to_string(),
        },

        Request::Shutdown => {
            daemon.shutdown_requested = true;
            Response::ShuttingDown
        }

        Request::Status => {
            let jobs_active = daemon
                .service
                .list_jobs()
                .iter()
                .filter(|j| !j.is_terminal())
                .count();
            let runners_active = daemon
                .service
                .list_runners()
                .iter()
                .filter(|r| !r.status.is_terminal())
                .count();
            Response::Status {
                uptime_secs: daemon.start_time.elapsed().as_secs(),
                jobs_active,
                runners_active,
            }
        }

        Request::EnqueueRun { run } => into_response(enqueue_run(daemon, &run).await),

        Request::CancelRun { run, force } => {
            into_response(cancel_run(daemon, &run, force).await)
        }

        Request::ListJobs => Response::Jobs {
            jobs: daemon.service.list_jobs(),
        },

        Request::ListRunners => Response::Runners {
            runners: daemon.service.list_runners(),
        },

        Request::CreatePool { options } => {
            match daemon.service.create_pool(&operator, options) {
                Ok(pool) => Response::Pool { pool },
                Err(e) => error_response(e),
            }
        }

        Request::CreateAgentToken {
            pool_id,
            description,
        } => match daemon
            .service
            .create_agent_token(&operator, &pool_id, &description)
        {
            Ok((token, bearer)) => Response::AgentToken { token, bearer },
            Err(e) => error_response(e),
        },
    }
}

/// Create a job for the current phase of a run in the remote
async fn enqueue_run(
    daemon: &DaemonState,
    run: &RunId,
) -> Result<Option<Job>, ServerError> {
    let run = daemon.remote.get_run(run).await.map_err(ServerError::request)?;
    let job = daemon
        .service
        .create_job(&run)
        .await
        .map_err(ServerError::request)?;
    info!(job_id = %job.id, run_id = %run.id, "enqueued run");
    Ok(Some(job))
}

/// Record the cancel request on the run, then carry it to the run's job
async fn cancel_run(
    daemon: &DaemonState,
    run: &RunId,
    force: bool,
) -> Result<Option<Job>, ServerError> {
    let now = daemon.service.clock().now();
    let run = daemon
        .remote
        .request_cancel(run, force, now)
        .await
        .map_err(ServerError::request)?;
    let job = daemon
        .service
        .cancel_job(&run)
        .await
        .map_err(ServerError::request)?;
    info!(run_id = %run.id, force, status = ?run.status, "cancel requested");
    Ok(job)
}

fn into_response(result: Result<Option<Job>, ServerError>) -> Response {
    match result {
        Ok(job) => Response::Job { job },
        Err(e) => error_response(e),
    }
}

fn error_response(e: impl std::fmt::Display) -> Response {
    Response::Error {
        message: e.to_string(),
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("request timeout")]
    Timeout,

    #[error("{0}")]
    Request(String),
}

impl ServerError {
    fn request(e: impl std::fmt::Display) -> Self {
        Self::Request(e.to_string())
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
