use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

static SETTINGS: OnceLock<Settings> = OnceLock::new();

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub junkipedia: Junkipedia,
    pub twitter: Twitter,
    pub analysis: Analysis,
    pub browse: Browse,
    pub pledge: Pledge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub port: u16,
    pub ingest_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Junkipedia {
    pub base_url: String,
    pub channel_id: String,
    pub timeout_secs: u64,
    pub per_page: u32,
    pub max_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Twitter {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Browse {
    pub fetch_limit: i64,
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pledge {
    pub stripe_base_url: String,
    pub currency: String,
    pub min_amount_cents: i64,
    pub max_amount_cents: i64,
    pub recent_pledgers: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: Server {
                port: 3030,
                ingest_on_start: false,
            },
            junkipedia: Junkipedia {
                base_url: "https://www.junkipedia.org/api/v1".to_string(),
                channel_id: "1236340".to_string(),
                timeout_secs: 30,
                per_page: 100,
                max_pages: 20,
            },
            twitter: Twitter {
                base_url: "https://api.twitter.com/2".to_string(),
                timeout_secs: 15,
            },
            analysis: Analysis {
                endpoint: None,
                timeout_secs: 60,
            },
            browse: Browse {
                fetch_limit: 1000,
                page_size: 50,
            },
            pledge: Pledge {
                stripe_base_url: "https://api.stripe.com/v1".to_string(),
                currency: "usd".to_string(),
                min_amount_cents: 100,
                max_amount_cents: 100_000,
                recent_pledgers: 10,
            },
        }
    }
}

impl Settings {
    pub fn load() -> &'static Settings {
        SETTINGS.get_or_init(Self::load_from_files)
    }

    fn load_from_files() -> Settings {
        let default_path = Path::new("settings.default.ron");
        let override_path = Path::new("settings.ron");

        let mut settings = if default_path.exists() {
            fs::read_to_string(default_path)
                .ok()
                .and_then(|content| ron::from_str(&content).ok())
                .unwrap_or_default()
        } else {
            Settings::default()
        };

        if override_path.exists() {
            if let Ok(content) = fs::read_to_string(override_path) {
                if let Ok(overrides) = ron::from_str::<Settings>(&content) {
                    settings = overrides;
                }
            }
        }

        settings
    }
}

pub fn settings() -> &'static Settings {
    Settings::load()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_ron() {
        let defaults = Settings::default();
        let text = ron::to_string(&defaults).expect("serialize settings");
        let parsed: Settings = ron::from_str(&text).expect("parse settings");
        assert_eq!(parsed.browse.fetch_limit, 1000);
        assert_eq!(parsed.junkipedia.base_url, defaults.junkipedia.base_url);
        assert!(parsed.analysis.endpoint.is_none());
    }

    #[test]
    fn test_pledge_bounds_are_ordered() {
        let s = Settings::default();
        assert!(s.pledge.min_amount_cents > 0);
        assert!(s.pledge.min_amount_cents < s.pledge.max_amount_cents);
    }
}
