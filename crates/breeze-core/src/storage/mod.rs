pub mod station;
pub mod wind;

pub use station::{HISTORY_INTERVAL_MS, HISTORY_LEN, StationHistory, StationSnapshot};
pub use wind::{
    DEFAULT_GUST_RANK, GUST_BUFFER_LEN, WIND_HIST_LEN, WIND_HIST_STEP_MS, WindHistoryStore,
    WindSample, WindSummary,
};
