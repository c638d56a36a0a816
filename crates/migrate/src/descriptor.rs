//! Connection descriptor
//!
//! Holds the connection parameters for one PostgreSQL database and turns them
//! into either a libpq style `key=value` string or driver connect options.

use std::fmt;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection, PgConnection};
use tracing::{debug, warn};

use crate::error::{MigrateError, MigrateResult};

/// Database used for administrative connections
pub const ADMIN_DATABASE: &str = "postgres";

/// Connection parameters for a target database
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub port: u16,
    /// Extra `key=value` tokens, appended verbatim when rendering
    pub options: String,
}

impl Default for ConnectionDescriptor {
    fn default() -> Self {
        Self {
            host: "/var/run/postgresql".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            dbname: ADMIN_DATABASE.to_string(),
            port: 5432,
            options: "sslmode=disable".to_string(),
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("dbname", &self.dbname)
            .field("port", &self.port)
            .field("options", &self.options)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Render the connection string. Empty fields and a zero port are left out.
    pub fn render(&self) -> String {
        self.render_with_password(&self.password)
    }

    /// Same as [`render`](Self::render) with the password masked, for logs and errors
    pub fn redacted(&self) -> String {
        let mask = if self.password.is_empty() { "" } else { "***" };
        self.render_with_password(mask)
    }

    fn render_with_password(&self, password: &str) -> String {
        let mut tokens = Vec::new();

        if !self.host.is_empty() {
            tokens.push(format!("host={}", self.host));
        }
        if !self.user.is_empty() {
            tokens.push(format!("user={}", self.user));
        }
        if !password.is_empty() {
            tokens.push(format!("password={}", password));
        }
        if !self.dbname.is_empty() {
            tokens.push(format!("dbname={}", self.dbname));
        }
        if self.port != 0 {
            tokens.push(format!("port={}", self.port));
        }
        if !self.options.is_empty() {
            tokens.push(self.options.clone());
        }

        tokens.join(" ")
    }

    /// Same credentials, pointed at the maintenance database
    pub fn admin(&self) -> Self {
        Self {
            dbname: ADMIN_DATABASE.to_string(),
            ..self.clone()
        }
    }

    /// Build driver options. Hosts starting with `/` are unix socket directories.
    pub fn connect_options(&self) -> MigrateResult<PgConnectOptions> {
        let mut options = PgConnectOptions::new();

        if !self.host.is_empty() {
            options = if self.host.starts_with('/') {
                options.socket(&self.host)
            } else {
                options.host(&self.host)
            };
        }
        if !self.user.is_empty() {
            options = options.username(&self.user);
        }
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        if !self.dbname.is_empty() {
            options = options.database(&self.dbname);
        }
        if self.port != 0 {
            options = options.port(self.port);
        }

        let mut server_params = Vec::new();
        for token in self.options.split_whitespace() {
            let invalid = || MigrateError::InvalidOption {
                option: token.to_string(),
            };
            let (key, value) = token.split_once('=').ok_or_else(invalid)?;

            options = match key {
                "sslmode" => options.ssl_mode(value.parse::<PgSslMode>().map_err(|_| invalid())?),
                "sslrootcert" => options.ssl_root_cert(value),
                "sslcert" => options.ssl_client_cert(value),
                "sslkey" => options.ssl_client_key(value),
                "application_name" => options.application_name(value),
                "statement_cache_capacity" => {
                    options.statement_cache_capacity(value.parse::<usize>().map_err(|_| invalid())?)
                }
                // Enforced around the connect call, see `connect`
                "connect_timeout" => {
                    value.parse::<u64>().map_err(|_| invalid())?;
                    options
                }
                _ => {
                    server_params.push((key, value));
                    options
                }
            };
        }

        // Anything else is a server runtime parameter, sent as `-c key=value`
        if !server_params.is_empty() {
            options = options.options(server_params);
        }

        Ok(options)
    }

    /// `connect_timeout` from the options string, in seconds. Zero means no limit.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.options
            .split_whitespace()
            .filter_map(|token| token.strip_prefix("connect_timeout="))
            .filter_map(|value| value.parse::<u64>().ok())
            .last()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Open a single connection and ping it
    pub async fn connect(&self) -> MigrateResult<PgConnection> {
        let options = self.connect_options()?;
        debug!("Connecting to {}", self.redacted());

        let connecting = PgConnection::connect_with(&options);
        let connected = match self.connect_timeout() {
            Some(limit) => match tokio::time::timeout(limit, connecting).await {
                Ok(connected) => connected,
                Err(_) => Err(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no connection after {}s", limit.as_secs()),
                ))),
            },
            None => connecting.await,
        };
        let mut conn = connected.map_err(|source| self.connection_error(source))?;

        if let Err(source) = conn.ping().await {
            if let Err(e) = conn.close().await {
                warn!("Failed to close connection after failed ping: {}", e);
            }
            return Err(self.connection_error(source));
        }

        Ok(conn)
    }

    fn connection_error(&self, source: sqlx::Error) -> MigrateError {
        MigrateError::Connection {
            target: self.redacted(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "db.internal".to_string(),
            user: "deploy".to_string(),
            password: "s3cret".to_string(),
            dbname: "inventory".to_string(),
            port: 5433,
            options: "sslmode=disable application_name=pgupgrade".to_string(),
        }
    }

    #[test]
    fn test_render_all_fields() {
        assert_eq!(
            descriptor().render(),
            "host=db.internal user=deploy password=s3cret dbname=inventory port=5433 \
             sslmode=disable application_name=pgupgrade"
        );
    }

    #[test]
    fn test_render_skips_empty_fields() {
        let desc = ConnectionDescriptor {
            host: String::new(),
            user: "postgres".to_string(),
            password: String::new(),
            dbname: String::new(),
            port: 0,
            options: String::new(),
        };
        assert_eq!(desc.render(), "user=postgres");
    }

    #[test]
    fn test_render_defaults() {
        assert_eq!(
            ConnectionDescriptor::default().render(),
            "host=/var/run/postgresql user=postgres dbname=postgres port=5432 sslmode=disable"
        );
    }

    #[test]
    fn test_password_is_masked() {
        let desc = descriptor();
        assert!(desc.redacted().contains("password=***"));
        assert!(!desc.redacted().contains("s3cret"));
        assert!(!format!("{:?}", desc).contains("s3cret"));
    }

    #[test]
    fn test_admin_keeps_credentials() {
        let admin = descriptor().admin();
        assert_eq!(admin.dbname, "postgres");
        assert_eq!(admin.user, "deploy");
        assert_eq!(admin.password, "s3cret");
        assert_eq!(admin.host, "db.internal");
        assert_eq!(admin.port, 5433);
        assert_eq!(admin.options, descriptor().options);
    }

    #[test]
    fn test_connect_options_accepts_known_keys() {
        let options = descriptor().connect_options().unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_username(), "deploy");
        assert_eq!(options.get_database(), Some("inventory"));
    }

    #[test]
    fn test_connect_options_socket_host() {
        let options = ConnectionDescriptor::default().connect_options().unwrap();
        assert_eq!(
            options.get_socket(),
            Some(&std::path::PathBuf::from("/var/run/postgresql"))
        );
    }

    #[test]
    fn test_connect_options_rejects_malformed_tokens() {
        for bad in [
            "sslmode",
            "search_path",
            "sslmode=sometimes",
            "statement_cache_capacity=lots",
            "connect_timeout=soon",
        ] {
            let desc = ConnectionDescriptor {
                options: bad.to_string(),
                ..ConnectionDescriptor::default()
            };
            match desc.connect_options() {
                Err(MigrateError::InvalidOption { option }) => assert_eq!(option, bad),
                other => panic!("Expected invalid option for '{}', got {:?}", bad, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_unknown_keys_become_server_parameters() {
        let desc = ConnectionDescriptor {
            options: "sslmode=disable search_path=app statement_timeout=5000".to_string(),
            ..ConnectionDescriptor::default()
        };
        let options = desc.connect_options().unwrap();
        let params = options.get_options().unwrap();
        assert!(params.contains("search_path=app"));
        assert!(params.contains("statement_timeout=5000"));
        assert!(!params.contains("sslmode"));
    }

    #[test]
    fn test_client_certificate_options() {
        let desc = ConnectionDescriptor {
            options: "sslmode=verify-full sslcert=/c.pem sslkey=/k.pem sslrootcert=/ca.pem".to_string(),
            ..ConnectionDescriptor::default()
        };
        let options = desc.connect_options().unwrap();
        assert!(options.get_options().is_none());
    }

    #[test]
    fn test_connect_timeout() {
        let desc = ConnectionDescriptor {
            options: "sslmode=disable connect_timeout=10".to_string(),
            ..ConnectionDescriptor::default()
        };
        assert!(desc.connect_options().unwrap().get_options().is_none());
        assert_eq!(desc.connect_timeout(), Some(Duration::from_secs(10)));

        let unlimited = ConnectionDescriptor {
            options: "connect_timeout=0".to_string(),
            ..ConnectionDescriptor::default()
        };
        assert_eq!(unlimited.connect_timeout(), None);
        assert_eq!(ConnectionDescriptor::default().connect_timeout(), None);
    }
}
