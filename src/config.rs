use serde::{Deserialize, Serialize};

/// How deep `describe()` follows links before printing just the type name.
pub const DESCRIPTION_MAX_DEPTH: usize = 5;

/// Session configuration
///
/// Controls how a [`Session`](crate::Session) is opened. Can be built in code,
/// parsed from a URL, or deserialized from a host configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session name, used in logs and descriptions
    pub name: String,

    /// Refuse write transactions
    pub read_only: bool,

    /// Link depth for object descriptions
    pub description_max_depth: usize,
}

impl SessionConfig {
    /// Create a new configuration with default settings
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            read_only: false,
            description_max_depth: DESCRIPTION_MAX_DEPTH,
        }
    }

    /// Open the session read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set the maximum link depth followed by `describe()`
    pub fn description_max_depth(mut self, depth: usize) -> Self {
        self.description_max_depth = depth;
        self
    }

    /// Parse from a URL
    ///
    /// Format: "livemodel://name?read_only=true&description_max_depth=3"
    ///
    /// # Examples
    ///
    /// ```
    /// use livemodel::SessionConfig;
    ///
    /// let config = SessionConfig::from_url("livemodel://kennel?read_only=true").unwrap();
    /// assert_eq!(config.name, "kennel");
    /// assert!(config.read_only);
    /// ```
    pub fn from_url(url: &str) -> Result<Self, String> {
        let Some(rest) = url.strip_prefix("livemodel://") else {
            return Err("URL must start with 'livemodel://'".to_string());
        };

        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (rest, None),
        };

        let mut config = Self::new(name);
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Invalid query parameter '{}'", pair))?;
            match key {
                "read_only" => {
                    config.read_only = value
                        .parse()
                        .map_err(|_| format!("Invalid read_only value '{}'", value))?;
                }
                "description_max_depth" => {
                    config.description_max_depth = value
                        .parse()
                        .map_err(|_| format!("Invalid description_max_depth '{}'", value))?;
                }
                other => return Err(format!("Unknown parameter '{}'", other)),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Convert to a URL
    pub fn to_url(&self) -> String {
        format!(
            "livemodel://{}?read_only={}&description_max_depth={}",
            self.name, self.read_only, self.description_max_depth
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Session name cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("default")
    }
}
