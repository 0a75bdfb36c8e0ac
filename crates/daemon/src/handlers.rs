// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// RPC request handlers
//
// Each handler returns a Response; lifecycle failures map to the
// distinct numeric codes clients branch on.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::info;

use gurren_common::error::Error;
use gurren_common::protocol::{
    Request, Response, TunnelInfo, TunnelListResult, TunnelRegisterParams, TunnelRegisterResult,
    TunnelStartParams, TunnelStatusParams, TunnelStatusResult, TunnelStopParams, PingResult,
    ERR_CODE_AUTH_REQUIRED, ERR_CODE_INTERNAL, ERR_CODE_INVALID_PARAMS, ERR_CODE_METHOD_NOT_FOUND,
    ERR_CODE_TUNNEL_ACTIVE, ERR_CODE_TUNNEL_INACTIVE, ERR_CODE_TUNNEL_NOT_FOUND,
    METHOD_DAEMON_PING, METHOD_DAEMON_SHUTDOWN, METHOD_SUBSCRIBE, METHOD_TUNNEL_LIST,
    METHOD_TUNNEL_REGISTER, METHOD_TUNNEL_START, METHOD_TUNNEL_STATUS, METHOD_TUNNEL_STOP,
};
use gurren_common::config::TunnelConfig;

use crate::service::{DaemonState, Session};
use crate::{auth, sshconfig};

/// Dispatch a request to its handler by method name
pub async fn dispatch(state: &Arc<DaemonState>, session: &Arc<Session>, req: Request) -> Response {
    match req.method.as_str() {
        METHOD_SUBSCRIBE => handle_subscribe(state, session, &req).await,
        METHOD_TUNNEL_START => handle_tunnel_start(state, &req).await,
        METHOD_TUNNEL_STOP => handle_tunnel_stop(state, &req).await,
        METHOD_TUNNEL_STATUS => handle_tunnel_status(state, &req).await,
        METHOD_TUNNEL_LIST => handle_tunnel_list(state, &req).await,
        METHOD_TUNNEL_REGISTER => handle_tunnel_register(state, &req).await,
        METHOD_DAEMON_PING => handle_ping(&req),
        METHOD_DAEMON_SHUTDOWN => handle_shutdown(state, &req),
        _ => Response::error(
            &req.id,
            ERR_CODE_METHOD_NOT_FOUND,
            &format!("unknown method: {}", req.method),
        ),
    }
}

fn decode_params<T: DeserializeOwned>(req: &Request) -> Option<T> {
    let value = req.params.clone().unwrap_or(Value::Null);
    serde_json::from_value(value).ok()
}

/// Add the session to the broadcast set
async fn handle_subscribe(
    state: &Arc<DaemonState>,
    session: &Arc<Session>,
    req: &Request,
) -> Response {
    state
        .subscribers
        .write()
        .await
        .insert(session.id, session.clone());
    Response::result(&req.id, json!({}))
}

async fn handle_tunnel_start(state: &Arc<DaemonState>, req: &Request) -> Response {
    let Some(params) = decode_params::<TunnelStartParams>(req) else {
        return Response::error(&req.id, ERR_CODE_INVALID_PARAMS, "invalid params");
    };
    if params.name.is_empty() {
        return Response::error(&req.id, ERR_CODE_INVALID_PARAMS, "name is required");
    }

    // The manager knows ephemeral tunnels; the config file is the
    // fallback for definitions it has not seen.
    let tunnel_cfg = match state.manager.get_config(&params.name).await {
        Some(cfg) => cfg,
        None => match state.config.tunnel_by_name(&params.name) {
            Some(cfg) => cfg.clone(),
            None => {
                return Response::error(
                    &req.id,
                    ERR_CODE_TUNNEL_NOT_FOUND,
                    &format!("tunnel {:?} not found", params.name),
                );
            }
        },
    };

    let (ssh_addr, ssh_user, identities) = sshconfig::resolve_host(&tunnel_cfg.host);
    let ssh_user = if ssh_user.is_empty() {
        sshconfig::login_user()
    } else {
        ssh_user
    };

    let caps = match auth::capabilities(&state.config.auth, &identities) {
        Ok(caps) => caps,
        Err(e) => {
            return Response::error(
                &req.id,
                ERR_CODE_AUTH_REQUIRED,
                &format!("auth error: {}", e),
            );
        }
    };

    if let Err(e) = state
        .manager
        .start(&params.name, caps, &ssh_addr, &ssh_user)
        .await
    {
        let code = match &e {
            Error::TunnelActive { .. } => ERR_CODE_TUNNEL_ACTIVE,
            Error::TunnelNotFound(_) => ERR_CODE_TUNNEL_NOT_FOUND,
            _ => ERR_CODE_INTERNAL,
        };
        return Response::error(&req.id, code, &e.to_string());
    }

    match state.manager.status(&params.name).await {
        Ok((status, error)) => Response::result(
            &req.id,
            TunnelStatusResult {
                name: params.name,
                status,
                error,
            },
        ),
        Err(e) => Response::error(&req.id, ERR_CODE_INTERNAL, &e.to_string()),
    }
}

async fn handle_tunnel_stop(state: &Arc<DaemonState>, req: &Request) -> Response {
    let Some(params) = decode_params::<TunnelStopParams>(req) else {
        return Response::error(&req.id, ERR_CODE_INVALID_PARAMS, "invalid params");
    };
    if params.name.is_empty() {
        return Response::error(&req.id, ERR_CODE_INVALID_PARAMS, "name is required");
    }

    match state.manager.stop(&params.name).await {
        Ok(()) => Response::result(&req.id, json!({})),
        Err(e) => {
            let code = match &e {
                Error::TunnelNotFound(_) => ERR_CODE_TUNNEL_NOT_FOUND,
                Error::TunnelInactive(_) => ERR_CODE_TUNNEL_INACTIVE,
                _ => ERR_CODE_INTERNAL,
            };
            Response::error(&req.id, code, &e.to_string())
        }
    }
}

async fn handle_tunnel_status(state: &Arc<DaemonState>, req: &Request) -> Response {
    let Some(params) = decode_params::<TunnelStatusParams>(req) else {
        return Response::error(&req.id, ERR_CODE_INVALID_PARAMS, "invalid params");
    };
    if params.name.is_empty() {
        return Response::error(&req.id, ERR_CODE_INVALID_PARAMS, "name is required");
    }

    match state.manager.status(&params.name).await {
        Ok((status, error)) => Response::result(
            &req.id,
            TunnelStatusResult {
                name: params.name,
                status,
                error,
            },
        ),
        Err(e) => Response::error(&req.id, ERR_CODE_TUNNEL_NOT_FOUND, &e.to_string()),
    }
}

async fn handle_tunnel_list(state: &Arc<DaemonState>, req: &Request) -> Response {
    let managed = state.manager.list().await;

    let tunnels: Vec<TunnelInfo> = managed
        .into_iter()
        .map(|mt| TunnelInfo {
            name: mt.config.name.clone(),
            status: mt.status,
            error: mt.error,
            ephemeral: mt.ephemeral,
            config: mt.config,
        })
        .collect();

    Response::result(&req.id, TunnelListResult { tunnels })
}

async fn handle_tunnel_register(state: &Arc<DaemonState>, req: &Request) -> Response {
    let Some(params) = decode_params::<TunnelRegisterParams>(req) else {
        return Response::error(&req.id, ERR_CODE_INVALID_PARAMS, "invalid params");
    };
    if params.host.is_empty() || params.remote.is_empty() || params.local.is_empty() {
        return Response::error(
            &req.id,
            ERR_CODE_INVALID_PARAMS,
            "host, remote, and local are required",
        );
    }

    let cfg = TunnelConfig {
        name: String::new(),
        host: params.host,
        remote: params.remote,
        local: params.local,
    };

    match state.manager.register(cfg).await {
        Ok(name) => Response::result(&req.id, TunnelRegisterResult { name }),
        Err(e) => Response::error(&req.id, ERR_CODE_INTERNAL, &e.to_string()),
    }
}

fn handle_ping(req: &Request) -> Response {
    Response::result(
        &req.id,
        PingResult {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )
}

/// Acknowledge first, then shut the service down so the response is
/// delivered before the socket goes away.
fn handle_shutdown(state: &Arc<DaemonState>, req: &Request) -> Response {
    info!("shutdown requested over RPC");

    let state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        state.shutdown().await;
    });

    Response::result(&req.id, json!({}))
}
