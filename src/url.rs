use crate::error::ChannelError;

/// Default origin assumed when callers pass an empty origin string.
pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Well-known local-development UI ports that must be remapped to the
/// backend service port when frontend and backend run separately.
pub const DEV_UI_PORTS: [&str; 2] = ["3000", "5173"];

/// Backend service port substituted for [`DEV_UI_PORTS`] during development.
pub const DEV_BACKEND_PORT: &str = "8000";

/// Path of the backend liveness probe endpoint.
pub const HEALTH_CHECK_PATH: &str = "/api/health";

/// Resolve the WebSocket URL for a logical channel path against an origin.
///
/// Resolution rules:
/// 1) `http`/`ws` origins map to `ws`, `https`/`wss` map to `wss`
/// 2) a localhost origin on a known UI dev port is remapped to the backend
///    service port
/// 3) the logical path is joined with exactly one leading slash
pub fn resolve_channel_url(origin: &str, logical_path: &str) -> Result<String, ChannelError> {
    let path = logical_path.trim();
    if path.is_empty() {
        return Err(ChannelError::EmptyLogicalPath);
    }

    let (scheme, authority) = split_origin(origin)?;
    let ws_scheme = match scheme {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ChannelError::InvalidOrigin(format!("scheme {other}"))),
    };

    let authority = remap_dev_authority(authority);
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    Ok(format!("{ws_scheme}://{authority}{path}"))
}

/// Resolve the HTTP liveness probe URL for the same origin.
pub fn health_check_url(origin: &str) -> Result<String, ChannelError> {
    let (scheme, authority) = split_origin(origin)?;
    let http_scheme = match scheme {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        other => return Err(ChannelError::InvalidOrigin(format!("scheme {other}"))),
    };

    let authority = remap_dev_authority(authority);
    Ok(format!("{http_scheme}://{authority}{HEALTH_CHECK_PATH}"))
}

fn split_origin(origin: &str) -> Result<(&str, &str), ChannelError> {
    let origin = origin.trim().trim_end_matches('/');
    let origin = if origin.is_empty() { DEFAULT_ORIGIN } else { origin };

    let (scheme, authority) = origin
        .split_once("://")
        .ok_or_else(|| ChannelError::InvalidOrigin(origin.to_string()))?;
    if authority.is_empty() || authority.contains('/') {
        return Err(ChannelError::InvalidOrigin(origin.to_string()));
    }
    Ok((scheme, authority))
}

fn remap_dev_authority(authority: &str) -> String {
    if let Some((host, port)) = authority.rsplit_once(':') {
        if matches!(host, "localhost" | "127.0.0.1") && DEV_UI_PORTS.contains(&port) {
            return format!("{host}:{DEV_BACKEND_PORT}");
        }
    }
    authority.to_string()
}

#[cfg(test)]
mod tests {
    use super::{health_check_url, resolve_channel_url};

    #[test]
    fn resolve_maps_https_origin_to_wss() {
        let url = resolve_channel_url("https://app.example.com", "/chat/42").unwrap();
        assert_eq!(url, "wss://app.example.com/chat/42");
    }

    #[test]
    fn resolve_remaps_dev_ui_port_to_backend_port() {
        let url = resolve_channel_url("http://localhost:5173", "chat/42").unwrap();
        assert_eq!(url, "ws://localhost:8000/chat/42");
    }

    #[test]
    fn resolve_rejects_empty_logical_path() {
        assert!(resolve_channel_url("https://app.example.com", "  ").is_err());
    }

    #[test]
    fn health_url_keeps_http_scheme() {
        let url = health_check_url("http://localhost:3000").unwrap();
        assert_eq!(url, "http://localhost:8000/api/health");
    }
}
