use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let config_path = default_config_path();
        let mut cfg = Self {
            inner: default_map(),
            config_path,
        };

        // Read .coderc if exists
        let rc = cfg.config_path.clone();
        cfg.merge_rc_file(&rc);

        // Overlay environment variables (take precedence)
        cfg.merge(env::vars().filter(|(k, _)| is_config_key(k)));
        cfg
    }

    /// Defaults only, no rc file and no environment.
    pub fn defaults() -> Self {
        Self {
            inner: default_map(),
            config_path: default_config_path(),
        }
    }

    pub fn merge<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in pairs {
            self.inner.insert(k.into(), v.into());
        }
    }

    fn merge_rc_file(&mut self, path: &Path) {
        let Ok(file) = fs::File::open(path) else {
            return;
        };
        let reader = BufReader::new(file);
        for line in reader.lines().map_while(|l| l.ok()) {
            if let Some((k, v)) = parse_rc_line(&line) {
                self.inner.insert(k, v);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    /// Like [`Config::get`] but treats a blank value as missing and errors out.
    pub fn require(&self, key: &str) -> Result<String> {
        self.get(key)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "Missing {}. Set it in env or {}",
                    key,
                    self.config_path.display()
                )
            })
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.trim().parse::<u32>().ok())
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.get_u64("REQUEST_TIMEOUT").unwrap_or(60)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.get("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn sandbox_home(&self) -> String {
        self.get("SANDBOX_HOME")
            .unwrap_or_else(|| "/home/user".to_string())
    }
}

fn parse_rc_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (k, v) = line.split_once('=')?;
    Some((k.trim().to_string(), v.trim().to_string()))
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "DEFAULT_MODEL",
        "MAX_TOKENS",
        "REQUEST_TIMEOUT",
        "SANDBOX_TEMPLATE",
        "INTERPRETER_TEMPLATE",
        "SANDBOX_TIMEOUT",
        "SANDBOX_HOME",
        "OUTPUT_DIR",
        "PRETTIFY_MARKDOWN",
    ];

    KEYS.contains(&k)
        || k.starts_with("CODE_OPUS_")
        || k.starts_with("ANTHROPIC_")
        || k.starts_with("E2B_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("code_opus").join(".coderc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Endpoints
    m.insert("ANTHROPIC_BASE_URL".into(), "https://api.anthropic.com".into());
    m.insert("ANTHROPIC_VERSION".into(), "2023-06-01".into());
    m.insert("E2B_DOMAIN".into(), "e2b.app".into());

    // Numbers
    m.insert("MAX_TOKENS".into(), "4096".into());
    m.insert("REQUEST_TIMEOUT".into(), "60".into());
    m.insert("SANDBOX_TIMEOUT".into(), "300".into());

    // Strings
    m.insert("DEFAULT_MODEL".into(), "claude-3-opus-20240229".into());
    m.insert("SANDBOX_TEMPLATE".into(), "base".into());
    m.insert("INTERPRETER_TEMPLATE".into(), "code-interpreter-v1".into());
    m.insert("SANDBOX_HOME".into(), "/home/user".into());
    m.insert("OUTPUT_DIR".into(), ".".into());

    // Bools as strings
    m.insert("PRETTIFY_MARKDOWN".into(), "true".into());

    m
}
