//! HTTP request surface.
//!
//! `GET /{command}` maps onto one controller operation and answers with a
//! plain-text message. `/` is treated as `status`.

use crate::controller::LampController;
use crate::error::LampError;
use crate::infrastructure::bluetooth::transport::BleTransport;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const INVALID_BRIGHTNESS: &str =
    "Invalid brightness command. Use 'brightness?value=XX' where XX is between 1 and 100.";

/// Commands accepted on the request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampAction {
    On,
    Off,
    Status,
    Brightness,
    Up,
    Down,
}

impl FromStr for LampAction {
    type Err = LampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "status" | "" => Ok(Self::Status),
            "brightness" => Ok(Self::Brightness),
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(LampError::InvalidParameter(format!(
                "unknown command {:?}",
                other
            ))),
        }
    }
}

fn text_response(status: StatusCode, text: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(text.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn error_response(e: LampError) -> Response<Body> {
    warn!("Request failed: {}", e);
    let text = if e.is_link_failure() {
        format!("Failed to connect to the lamp: {}", e)
    } else {
        e.to_string()
    };
    text_response(StatusCode::INTERNAL_SERVER_ERROR, text)
}

/// Parse a requested brightness. Integers too large for `i64` saturate,
/// since the controller clamps them to the lamp's range anyway.
fn parse_level(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(level) = value.parse::<i64>() {
        return Some(level);
    }
    let (negative, digits) = match value.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(if negative { i64::MIN } else { i64::MAX })
}

fn query_value(req: &Request<Body>) -> Option<String> {
    let query = req.uri().query()?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "value")
        .map(|(_, value)| value.into_owned())
}

/// Serve one request against the shared controller
pub async fn handle<T: BleTransport>(
    controller: Arc<LampController<T>>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Method {} not supported", req.method()),
        ));
    }

    let path = req.uri().path().trim_matches('/');
    if path.contains('/') {
        return Ok(text_response(StatusCode::NOT_FOUND, "Not found"));
    }
    let action = match LampAction::from_str(path) {
        Ok(action) => action,
        Err(e) => {
            debug!("{}", e);
            return Ok(text_response(StatusCode::BAD_REQUEST, "Unknown command"));
        }
    };
    debug!("Handling {:?}", action);

    let result = match action {
        LampAction::On => controller
            .turn_on()
            .await
            .map(|()| "Lamp turned ON".to_string()),
        LampAction::Off => controller
            .turn_off()
            .await
            .map(|()| "Lamp turned OFF".to_string()),
        LampAction::Status => controller.get_status().await.map(|status| {
            format!(
                "Lamp is {}, brightness: {}",
                if status.is_on { "ON" } else { "OFF" },
                status.brightness
            )
        }),
        LampAction::Brightness => {
            let requested = match query_value(&req).and_then(|v| parse_level(&v)) {
                Some(value) => value,
                None => return Ok(text_response(StatusCode::BAD_REQUEST, INVALID_BRIGHTNESS)),
            };
            controller
                .set_brightness(requested)
                .await
                .map(|level| format!("Brightness set to {}", level))
        }
        LampAction::Up => controller
            .increase_brightness()
            .await
            .map(|level| format!("Brightness increased to {}", level)),
        LampAction::Down => controller
            .decrease_brightness()
            .await
            .map(|level| format!("Brightness decreased to {}", level)),
    };

    Ok(match result {
        Ok(text) => text_response(StatusCode::OK, text),
        Err(e) => error_response(e),
    })
}

/// Run the HTTP server until `shutdown` resolves
pub async fn serve<T, F>(
    controller: Arc<LampController<T>>,
    addr: SocketAddr,
    shutdown: F,
) -> anyhow::Result<()>
where
    T: BleTransport + 'static,
    F: Future<Output = ()>,
{
    let make_service = make_service_fn(move |_conn| {
        let controller = controller.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(controller.clone(), req))) }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("Server started at http://{}", server.local_addr());
    server.with_graceful_shutdown(shutdown).await?;
    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceAddress;
    use crate::infrastructure::bluetooth::connection::ConnectionConfig;
    use crate::infrastructure::bluetooth::fake::{FakeLamp, FakeTransport};

    fn controller(lamp: &FakeLamp) -> Arc<LampController<FakeTransport>> {
        let address = DeviceAddress::new("f8:24:41:e4:62:9f").unwrap();
        Arc::new(LampController::new(
            lamp.transport(),
            address,
            ConnectionConfig::default(),
        ))
    }

    async fn get(controller: &Arc<LampController<FakeTransport>>, uri: &str) -> (StatusCode, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = handle(controller.clone(), req).await.unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!("on".parse::<LampAction>().unwrap(), LampAction::On);
        assert_eq!("".parse::<LampAction>().unwrap(), LampAction::Status);
        assert!(matches!(
            "blink".parse::<LampAction>(),
            Err(LampError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(" 42 "), Some(42));
        assert_eq!(parse_level("-7"), Some(-7));
        assert_eq!(parse_level("99999999999999999999"), Some(i64::MAX));
        assert_eq!(parse_level("+99999999999999999999"), Some(i64::MAX));
        assert_eq!(parse_level("-99999999999999999999"), Some(i64::MIN));
        assert_eq!(parse_level("12.5"), None);
        assert_eq!(parse_level("-"), None);
        assert_eq!(parse_level(""), None);
    }

    #[tokio::test]
    async fn test_power_and_status() {
        let lamp = FakeLamp::new();
        let controller = controller(&lamp);

        assert_eq!(
            get(&controller, "/on").await,
            (StatusCode::OK, "Lamp turned ON".to_string())
        );
        assert_eq!(
            get(&controller, "/off").await,
            (StatusCode::OK, "Lamp turned OFF".to_string())
        );
        assert_eq!(
            get(&controller, "/status").await,
            (StatusCode::OK, "Lamp is OFF, brightness: 1".to_string())
        );
        assert_eq!(
            get(&controller, "/").await,
            (StatusCode::OK, "Lamp is OFF, brightness: 1".to_string())
        );
        assert_eq!(lamp.connects(), 1);
    }

    #[tokio::test]
    async fn test_brightness_commands() {
        let lamp = FakeLamp::new();
        let controller = controller(&lamp);

        assert_eq!(
            get(&controller, "/brightness?value=95").await,
            (StatusCode::OK, "Brightness set to 95".to_string())
        );
        assert_eq!(
            get(&controller, "/up").await,
            (StatusCode::OK, "Brightness increased to 100".to_string())
        );
        assert_eq!(
            get(&controller, "/down").await,
            (StatusCode::OK, "Brightness decreased to 90".to_string())
        );
        assert_eq!(
            get(&controller, "/brightness?value=250").await,
            (StatusCode::OK, "Brightness set to 100".to_string())
        );
    }

    #[tokio::test]
    async fn test_out_of_range_brightness_saturates() {
        let lamp = FakeLamp::new();
        let controller = controller(&lamp);

        assert_eq!(
            get(&controller, "/brightness?value=99999999999999999999").await,
            (StatusCode::OK, "Brightness set to 100".to_string())
        );
        assert_eq!(
            get(&controller, "/brightness?value=-99999999999999999999").await,
            (StatusCode::OK, "Brightness set to 1".to_string())
        );
        assert_eq!(controller.state().brightness, 1);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let lamp = FakeLamp::new();
        let controller = controller(&lamp);

        let (status, body) = get(&controller, "/brightness").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, INVALID_BRIGHTNESS);

        let (status, _) = get(&controller, "/brightness?value=bright").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(
            get(&controller, "/disco").await,
            (StatusCode::BAD_REQUEST, "Unknown command".to_string())
        );
        assert_eq!(get(&controller, "/on/now").await.0, StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method(Method::POST)
            .uri("/on")
            .body(Body::empty())
            .unwrap();
        let response = handle(controller.clone(), req).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        // none of the above touched the lamp
        assert_eq!(lamp.discoveries(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_lamp() {
        let lamp = FakeLamp::new();
        lamp.fail_discoveries(u32::MAX);
        let controller = controller(&lamp);

        let (status, body) = get(&controller, "/on").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("Failed to connect to the lamp:"));
    }

    #[tokio::test]
    async fn test_send_failure() {
        let lamp = FakeLamp::new();
        let controller = controller(&lamp);
        controller.connect().await.unwrap();
        lamp.fail_writes(1);

        let (status, body) = get(&controller, "/off").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Transport error: write failed");
    }
}
