use std::io::Read;
use std::time::Duration;

use url::Url;

use crate::error::FetchError;

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 5;

/// Upper bound for a buffered response body.
pub const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

const USER_AGENT: &str = concat!("panel/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        RawResponse {
            status: 200,
            location: None,
            body: body.into(),
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        RawResponse {
            status,
            location: Some(location.to_string()),
            body: Vec::new(),
        }
    }
}

/// One blocking GET without following redirects.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<RawResponse, FetchError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
    max_body: u64,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .redirects(0)
            .user_agent(USER_AGENT)
            .build();
        UreqTransport {
            agent,
            max_body: MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body(mut self, max_body: u64) -> Self {
        self.max_body = max_body;
        self
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str) -> Result<RawResponse, FetchError> {
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(e)) => return Err(FetchError::Transport(e.to_string())),
        };
        let status = response.status();
        let location = response.header("location").map(str::to_string);
        let mut body = Vec::new();
        if (200..300).contains(&status) {
            response
                .into_reader()
                .take(self.max_body + 1)
                .read_to_end(&mut body)
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            if body.len() as u64 > self.max_body {
                return Err(FetchError::TooLarge(self.max_body));
            }
        }
        Ok(RawResponse {
            status,
            location,
            body,
        })
    }
}

fn resolve_location(current: &str, location: &str) -> Result<String, FetchError> {
    Url::parse(current)
        .and_then(|base| base.join(location))
        .map(String::from)
        .map_err(|_| FetchError::InvalidUrl(location.to_string()))
}

/// GET `url`, following up to [`MAX_REDIRECTS`] redirects, and return the
/// body of the first 2xx response.
pub fn fetch(transport: &dyn Transport, url: &str) -> Result<Vec<u8>, FetchError> {
    let mut current = url.to_string();
    for _ in 0..=MAX_REDIRECTS {
        let response = transport.get(&current)?;
        match response.status {
            200..=299 => return Ok(response.body),
            301 | 302 | 303 | 307 | 308 => {
                let location = response
                    .location
                    .ok_or(FetchError::MissingLocation(response.status))?;
                let next = resolve_location(&current, &location)?;
                tracing::debug!("redirect {} -> {}", current, next);
                current = next;
            }
            status => return Err(FetchError::Status(status)),
        }
    }
    Err(FetchError::TooManyRedirects(MAX_REDIRECTS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    #[derive(Default)]
    struct Routes {
        responses: HashMap<String, RawResponse>,
        requested: Mutex<Vec<String>>,
    }

    impl Routes {
        fn with(mut self, url: &str, response: RawResponse) -> Self {
            self.responses.insert(url.to_string(), response);
            self
        }
    }

    impl Transport for Routes {
        fn get(&self, url: &str) -> Result<RawResponse, FetchError> {
            self.requested.lock().push(url.to_string());
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Transport(format!("connection refused: {}", url)))
        }
    }

    #[test]
    fn test_fetch_direct() {
        let routes = Routes::default().with("https://a.com/x.srs", RawResponse::ok("data"));
        assert_eq!(fetch(&routes, "https://a.com/x.srs"), Ok(b"data".to_vec()));
    }

    #[test]
    fn test_fetch_follows_relative_redirect() {
        let routes = Routes::default()
            .with(
                "https://a.com/x.srs",
                RawResponse::redirect(302, "https://b.com/dl/x"),
            )
            .with("https://b.com/dl/x", RawResponse::redirect(307, "../final.srs"))
            .with("https://b.com/final.srs", RawResponse::ok("payload"));
        assert_eq!(fetch(&routes, "https://a.com/x.srs"), Ok(b"payload".to_vec()));
        assert_eq!(routes.requested.lock().len(), 3);
    }

    #[test]
    fn test_fetch_redirect_limit() {
        let mut routes = Routes::default();
        for i in 0..=MAX_REDIRECTS {
            routes = routes.with(
                &format!("https://a.com/{}", i),
                RawResponse::redirect(301, &format!("/{}", i + 1)),
            );
        }
        routes = routes.with(
            &format!("https://a.com/{}", MAX_REDIRECTS + 1),
            RawResponse::ok("late"),
        );
        assert_eq!(
            fetch(&routes, "https://a.com/0"),
            Err(FetchError::TooManyRedirects(MAX_REDIRECTS))
        );

        // exactly MAX_REDIRECTS hops is still fine
        assert_eq!(fetch(&routes, "https://a.com/1"), Ok(b"late".to_vec()));
    }

    #[test]
    fn test_fetch_errors() {
        let routes = Routes::default()
            .with(
                "https://a.com/404",
                RawResponse {
                    status: 404,
                    ..RawResponse::default()
                },
            )
            .with(
                "https://a.com/moved",
                RawResponse {
                    status: 302,
                    ..RawResponse::default()
                },
            );
        assert_eq!(
            fetch(&routes, "https://a.com/404"),
            Err(FetchError::Status(404))
        );
        assert_eq!(
            fetch(&routes, "https://a.com/moved"),
            Err(FetchError::MissingLocation(302))
        );
        assert!(matches!(
            fetch(&routes, "https://down.com/"),
            Err(FetchError::Transport(_))
        ));
    }

    /// Serves one canned response per path on a loopback port, one request
    /// per connection. Returns the base url.
    fn serve(routes: Vec<(&'static str, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                loop {
                    let mut header = String::new();
                    match reader.read_line(&mut header) {
                        Ok(0) | Err(_) => break,
                        Ok(_) if header == "\r\n" => break,
                        Ok(_) => {}
                    }
                }
                let path = request_line.split_whitespace().nth(1).unwrap_or("/");
                let response = routes
                    .iter()
                    .find(|(p, _)| *p == path)
                    .map(|(_, r)| r.clone())
                    .unwrap_or_else(|| {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string()
                    });
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        base
    }

    fn ok_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn redirect_response(location: &str) -> String {
        format!(
            "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            location
        )
    }

    #[test]
    fn test_ureq_rejects_oversized_body() {
        let base = serve(vec![
            ("/big.srs", ok_response(&"x".repeat(64))),
            ("/exact.srs", ok_response(&"y".repeat(16))),
        ]);
        let transport = UreqTransport::new(Duration::from_secs(5)).with_max_body(16);

        assert_eq!(
            transport.get(&format!("{}/big.srs", base)),
            Err(FetchError::TooLarge(16))
        );
        assert_eq!(
            fetch(&transport, &format!("{}/big.srs", base)),
            Err(FetchError::TooLarge(16))
        );

        let response = transport.get(&format!("{}/exact.srs", base)).unwrap();
        assert_eq!(response.body, b"y".repeat(16));
    }

    #[test]
    fn test_ureq_redirect_hop() {
        let base = serve(vec![
            ("/start.srs", redirect_response("/final.srs")),
            ("/final.srs", ok_response("payload")),
        ]);
        let transport = UreqTransport::new(Duration::from_secs(5));

        // the agent itself does not follow redirects
        let raw = transport.get(&format!("{}/start.srs", base)).unwrap();
        assert_eq!(raw.status, 302);
        assert_eq!(raw.location.as_deref(), Some("/final.srs"));
        assert!(raw.body.is_empty());

        assert_eq!(
            fetch(&transport, &format!("{}/start.srs", base)),
            Ok(b"payload".to_vec())
        );
        assert_eq!(
            fetch(&transport, &format!("{}/missing.srs", base)),
            Err(FetchError::Status(404))
        );
    }
}
