//! Upstream schedule API client.
//!
//! Responses are normalized at this boundary (watch-core owns the alias
//! handling), so detectors never see raw payload shapes. The upstream blocks
//! non-browser clients, hence the browser User-Agent and Referer.

use serde_json::Value;
use watch_core::{normalize_courts, normalize_days, CourtSchedule, ScheduleDay, WatchConfig};

pub trait ScheduleSource: Send + Sync {
    /// The published schedule days for a tournament, in listing order.
    fn schedule_days(&self, tournament_key: &str) -> Result<Vec<ScheduleDay>, String>;

    /// The per-court match listing for one schedule day.
    fn court_schedule(&self, day_id: &str) -> Result<Vec<CourtSchedule>, String>;
}

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";
const REFERER: &str = "https://www.itftennis.com/";

pub struct HttpScheduleSource {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpScheduleSource {
    pub fn new(config: &WatchConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.upstream_timeout())
            .build();
        Self {
            agent,
            base_url: config.upstream.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn fetch(&self, path: &str, param: (&str, &str)) -> Result<Value, String> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .agent
            .get(&url)
            .query(param.0, param.1)
            .set("Accept", "application/json, text/plain, */*")
            .set("User-Agent", USER_AGENT)
            .set("Referer", REFERER)
            .call()
            .map_err(|err| format!("Upstream request to {} failed: {}", path, err))?;

        serde_json::from_reader(response.into_reader())
            .map_err(|err| format!("Upstream returned non-JSON from {}: {}", path, err))
    }
}

impl ScheduleSource for HttpScheduleSource {
    fn schedule_days(&self, tournament_key: &str) -> Result<Vec<ScheduleDay>, String> {
        let payload = self.fetch(
            "TournamentApi/GetScheduleDays",
            ("tournamentKey", tournament_key),
        )?;
        Ok(normalize_days(&payload))
    }

    fn court_schedule(&self, day_id: &str) -> Result<Vec<CourtSchedule>, String> {
        let payload = self.fetch("TournamentApi/GetCourtSchedule", ("scheduleDayId", day_id))?;
        Ok(normalize_courts(&payload))
    }
}
