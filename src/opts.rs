//! Client and proxy options.

use url::Url;

use crate::error::Error;
use crate::protocol::types::DataFormat;

/// Connection options for the client.
#[derive(Debug, Clone)]
pub struct ClientOpts {
    /// Hostname or IP address of the proxy.
    ///
    /// Default: `"localhost"`
    pub host: String,

    /// Port number of the proxy.
    ///
    /// Default: `8080`
    pub port: u16,

    /// Database requested in the `Hello` message.
    ///
    /// Default: `""`
    pub database: String,

    /// Encoding used for outgoing messages.
    ///
    /// Default: `DataFormat::Binary`
    pub format: DataFormat,

    /// Maximum rows requested per fetch (None = everything the proxy has).
    ///
    /// Default: `None`
    pub cursor_max_fetch: Option<usize>,

    /// Chunk size requested when reading LOBs.
    ///
    /// Default: `102400`
    pub lob_buffer_size: usize,

    /// Largest transport frame written; longer payloads use continuation frames.
    ///
    /// Default: `65536`
    pub max_frame_size: usize,
}

impl Default for ClientOpts {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            database: String::new(),
            format: DataFormat::Binary,
            cursor_max_fetch: None,
            lob_buffer_size: 102_400,
            max_frame_size: 65_536,
        }
    }
}

impl TryFrom<&Url> for ClientOpts {
    type Error = Error;

    /// Parse an SQP connection URL.
    ///
    /// Format: `sqp://host[:port][/database][?param1=value1&..]`
    ///
    /// Supported query parameters:
    /// - `format`: text, binary
    /// - `cursor_max_fetch`: rows per fetch (positive integer)
    /// - `lob_buffer_size`: LOB chunk size (positive integer)
    /// - `max_frame_size`: transport frame size (positive integer)
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if url.scheme() != "sqp" {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'sqp://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = ClientOpts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(8080),
            database: url.path().trim_start_matches('/').to_string(),
            ..ClientOpts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "format" => {
                    opts.format = match value.as_ref() {
                        "text" => DataFormat::Text,
                        "binary" => DataFormat::Binary,
                        _ => {
                            return Err(Error::InvalidUsage(format!(
                                "Invalid format: expected one of ['text', 'binary'], got {}",
                                value
                            )));
                        }
                    };
                }
                "cursor_max_fetch" => {
                    opts.cursor_max_fetch = Some(parse_positive(&key, &value)?);
                }
                "lob_buffer_size" => {
                    opts.lob_buffer_size = parse_positive(&key, &value)?;
                }
                "max_frame_size" => {
                    opts.max_frame_size = parse_positive(&key, &value)?;
                }
                _ => {
                    return Err(Error::InvalidUsage(format!(
                        "Unknown connection parameter: {}",
                        key
                    )));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for ClientOpts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize, Error> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", key, value))),
    }
}

/// Options for the proxy side.
#[derive(Debug, Clone)]
pub struct ProxyOpts {
    /// Maximum number of active backend connections. The deferred queue holds
    /// up to the same number of waiting requests.
    ///
    /// Default: `30`
    pub pool_size: usize,

    /// A forward-only cursor drops rows behind its read position once the
    /// position passes this many rows.
    ///
    /// Default: `50`
    pub compaction_threshold: usize,

    /// Upper bound for a single LOB chunk sent to the client.
    ///
    /// Default: `102400`
    pub max_lob_chunk: usize,

    /// Largest transport frame written; longer payloads use continuation frames.
    ///
    /// Default: `65536`
    pub max_frame_size: usize,

    /// Largest reassembled inbound message accepted.
    ///
    /// Default: `67108864`
    pub max_message_size: usize,
}

impl Default for ProxyOpts {
    fn default() -> Self {
        Self {
            pool_size: 30,
            compaction_threshold: 50,
            max_lob_chunk: 102_400,
            max_frame_size: 65_536,
            max_message_size: 64 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_url() {
        let opts = ClientOpts::try_from(
            "sqp://db.example:9000/sales?format=text&cursor_max_fetch=10&lob_buffer_size=64",
        )
        .unwrap();
        assert_eq!(opts.host, "db.example");
        assert_eq!(opts.port, 9000);
        assert_eq!(opts.database, "sales");
        assert_eq!(opts.format, DataFormat::Text);
        assert_eq!(opts.cursor_max_fetch, Some(10));
        assert_eq!(opts.lob_buffer_size, 64);
    }

    #[test]
    fn defaults_apply() {
        let opts = ClientOpts::try_from("sqp://localhost").unwrap();
        assert_eq!(opts.port, 8080);
        assert_eq!(opts.database, "");
        assert_eq!(opts.cursor_max_fetch, None);
        assert_eq!(opts.format, DataFormat::Binary);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ClientOpts::try_from("postgres://localhost/db").is_err());
        assert!(ClientOpts::try_from("sqp://localhost/db?cursor_max_fetch=0").is_err());
        assert!(ClientOpts::try_from("sqp://localhost/db?format=xml").is_err());
        assert!(ClientOpts::try_from("sqp://localhost/db?bogus=1").is_err());
    }
}
