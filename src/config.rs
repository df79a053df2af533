/*!
Structs to hold configuration data and global variables.
*/
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::{
    auth::{self, Auth},
    store::{mem::MemStore, pg::PgStore, Store},
};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    Memory,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    backend: Option<Backend>,
    db_connect_string: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    templates_dir: Option<String>,
    static_dir: Option<String>,
    /// In seconds.
    session_timeout: Option<u64>,
    salt_length: Option<usize>,
}

#[derive(Debug)]
pub struct Cfg {
    pub backend: Backend,
    pub db_connect_string: String,
    pub addr: SocketAddr,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
    pub session_timeout: Duration,
    pub salt_length: usize,
}

impl std::default::Default for Cfg {
    fn default() -> Self {
        Self {
            backend: Backend::Postgres,
            db_connect_string: "host=localhost user=gradebook password='gradebook' dbname=gradebook".to_owned(),
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8001),
            templates_dir: PathBuf::from("templates/"),
            static_dir: PathBuf::from("static/"),
            session_timeout: auth::DEFAULT_TIMEOUT,
            salt_length: 4,
        }
    }
}

impl Cfg {
    fn from_config_file(cf: ConfigFile) -> Result<Self, String> {
        let mut c = Self::default();

        if let Some(b) = cf.backend {
            c.backend = b;
        }
        if let Some(s) = cf.db_connect_string {
            c.db_connect_string = s;
        }
        if let Some(s) = cf.host {
            c.addr.set_ip(
                s.parse().map_err(|e| format!(
                    "Error parsing {:?} as IP address: {}",
                    &s, &e
                ))?
            );
        }
        if let Some(n) = cf.port {
            c.addr.set_port(n);
        }
        if let Some(s) = cf.templates_dir {
            c.templates_dir = PathBuf::from(s);
        }
        if let Some(s) = cf.static_dir {
            c.static_dir = PathBuf::from(s);
        }
        if let Some(n) = cf.session_timeout {
            c.session_timeout = Duration::from_secs(n);
        }
        if let Some(n) = cf.salt_length {
            c.salt_length = n;
        }

        Ok(c)
    }

    pub fn from_toml(text: &str) -> Result<Self, String> {
        let cf: ConfigFile = toml::from_str(text)
            .map_err(|e| format!("Unable to deserialize config file: {}", &e))?;
        Self::from_config_file(cf)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file {}: {}", path.display(), &e))?;
        Self::from_toml(&file_contents)
    }

    /// Apply `GRADEBOOK_DB` and `SESSION_TIMEOUT` from the environment, if
    /// they're set.
    pub fn apply_env(&mut self) -> Result<(), String> {
        if let Ok(s) = std::env::var("GRADEBOOK_DB") {
            self.db_connect_string = s;
        }
        if let Ok(s) = std::env::var("SESSION_TIMEOUT") {
            let n: u64 = s.parse().map_err(|e| format!(
                "Error parsing SESSION_TIMEOUT value {:?}: {}", &s, &e
            ))?;
            self.session_timeout = Duration::from_secs(n);
        }
        Ok(())
    }
}

/**
This guy hauls around the global state and gets passed in an
`axum::Extension` to the handlers who need him.
*/
pub struct Glob {
    pub store: Arc<dyn Store>,
    pub auth: Auth,
    pub addr: SocketAddr,
}

impl Glob {
    pub fn store(&self) -> &dyn Store { self.store.as_ref() }
}

impl std::fmt::Debug for Glob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Glob")
            .field("auth", &self.auth)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Builds global state from `cfg` and ensures all appropriate database
/// tables exist.
pub async fn load_configuration(cfg: &Cfg) -> Result<Glob, String> {
    log::trace!("load_configuration( {:?} ) called.", cfg);

    let store: Arc<dyn Store> = match cfg.backend {
        Backend::Postgres => Arc::new(PgStore::new(cfg.db_connect_string.clone())),
        Backend::Memory => {
            log::warn!("Using in-memory store; nothing will persist past shutdown.");
            Arc::new(MemStore::new())
        },
    };

    log::trace!("Checking state of data DB...");
    if let Err(e) = store.ensure_db_schema().await {
        let estr = format!("Unable to ensure state of data DB: {}", &e);
        return Err(estr);
    }
    log::trace!("...data DB okay.");

    let mut auth = Auth::new(cfg.session_timeout);
    auth.set_salt_length(cfg.salt_length);

    Ok(Glob { store, auth, addr: cfg.addr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_overridden() {
        let cfg = Cfg::from_toml(r#"
            backend = "memory"
            host = "127.0.0.1"
            port = 9000
            session_timeout = 60
        "#).unwrap();

        assert_eq!(cfg.backend, Backend::Memory);
        assert_eq!(cfg.addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.session_timeout, Duration::from_secs(60));
        assert_eq!(cfg.templates_dir, PathBuf::from("templates/"));
        assert_eq!(cfg.salt_length, 4);
    }

    #[test]
    fn bad_config() {
        assert!(Cfg::from_toml("host = \"not-an-ip\"").is_err());
        assert!(Cfg::from_toml("backend = \"sqlite\"").is_err());
        assert!(Cfg::from_toml("port = \"eighty\"").is_err());
    }

    #[tokio::test]
    async fn memory_backend_loads() {
        let cfg = Cfg::from_toml("backend = \"memory\"").unwrap();
        let glob = load_configuration(&cfg).await.unwrap();
        assert!(glob.store().get_user(1).await.unwrap().is_none());
    }
}
