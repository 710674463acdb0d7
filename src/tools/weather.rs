//! Weather tool - live conditions from the Amap (Gaode) weather API
//!
//! Only cities with a known adcode are supported. Without an API key the tool
//! stays registered but every call reports the missing configuration.

use super::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_WEATHER_BASE_URL: &str = "https://restapi.amap.com";

/// Upper bound for one weather lookup
pub const WEATHER_TIMEOUT: Duration = Duration::from_secs(5);

/// (Chinese name, English name, adcode)
const CITIES: &[(&str, &str, &str)] = &[
    ("北京", "Beijing", "110100"),
    ("上海", "Shanghai", "310100"),
    ("广州", "Guangzhou", "440100"),
    ("深圳", "Shenzhen", "440300"),
    ("杭州", "Hangzhou", "330100"),
    ("成都", "Chengdu", "510100"),
    ("重庆", "Chongqing", "500100"),
    ("天津", "Tianjin", "120100"),
    ("南京", "Nanjing", "320100"),
    ("武汉", "Wuhan", "420100"),
    ("西安", "Xi'an", "610100"),
    ("郑州", "Zhengzhou", "410100"),
    ("苏州", "Suzhou", "320500"),
    ("长沙", "Changsha", "430100"),
    ("沈阳", "Shenyang", "210100"),
    ("青岛", "Qingdao", "370200"),
    ("济南", "Jinan", "370100"),
    ("大连", "Dalian", "210200"),
    ("厦门", "Xiamen", "350200"),
    ("福州", "Fuzhou", "350100"),
    ("无锡", "Wuxi", "320200"),
    ("合肥", "Hefei", "340100"),
    ("昆明", "Kunming", "530100"),
    ("哈尔滨", "Harbin", "230100"),
    ("长春", "Changchun", "220100"),
    ("石家庄", "Shijiazhuang", "130100"),
    ("太原", "Taiyuan", "140100"),
    ("南昌", "Nanchang", "360100"),
    ("贵阳", "Guiyang", "520100"),
    ("南宁", "Nanning", "450100"),
    ("兰州", "Lanzhou", "620100"),
    ("乌鲁木齐", "Urumqi", "650100"),
    ("银川", "Yinchuan", "640100"),
    ("西宁", "Xining", "630100"),
    ("呼和浩特", "Hohhot", "150100"),
    ("拉萨", "Lhasa", "540100"),
    ("海口", "Haikou", "460100"),
    ("三亚", "Sanya", "460200"),
];

fn city_code(city: &str) -> Option<&'static str> {
    let city = city.trim();
    let city = city.strip_suffix('市').unwrap_or(city);
    CITIES
        .iter()
        .find(|(zh, en, _)| *zh == city || en.eq_ignore_ascii_case(city))
        .map(|(_, _, code)| *code)
}

pub struct WeatherTool {
    client: Client,
    api_key: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct WeatherInput {
    city: String,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    status: String,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    lives: Vec<LiveWeather>,
}

#[derive(Debug, Deserialize)]
struct LiveWeather {
    province: String,
    city: String,
    weather: String,
    temperature: String,
    winddirection: String,
    windpower: String,
    humidity: String,
    reporttime: String,
}

impl WeatherTool {
    pub fn new(api_key: Option<String>, base_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(WEATHER_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            url: format!("{}/v3/weather/weatherInfo", base_url.trim_end_matches('/')),
        })
    }

    /// Reads `GAODE_WEATHER_API_KEY` and optionally `GAODE_WEATHER_BASE_URL`
    pub fn from_env() -> Result<Self, reqwest::Error> {
        let base_url = std::env::var("GAODE_WEATHER_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_WEATHER_BASE_URL.to_string());
        Self::new(std::env::var("GAODE_WEATHER_API_KEY").ok(), &base_url)
    }

    async fn fetch(&self, api_key: &str, code: &str) -> Result<LiveWeather, String> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("key", api_key),
                ("city", code),
                ("extensions", "base"),
                ("output", "JSON"),
            ])
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("weather service returned HTTP {status}"));
        }
        let body: WeatherResponse = response
            .json()
            .await
            .map_err(|e| format!("unreadable response: {e}"))?;
        if body.status != "1" {
            return Err(format!(
                "weather service error: {}",
                body.info.as_deref().unwrap_or("unknown error")
            ));
        }
        body.lives
            .into_iter()
            .next()
            .ok_or_else(|| "no live weather in response".to_string())
    }
}

fn describe(live: &LiveWeather) -> String {
    format!(
        "{} {} weather:\n- Conditions: {}\n- Temperature: {}°C\n- Wind: {} {}\n- Humidity: {}%\n- Reported: {}",
        live.province,
        live.city,
        live.weather,
        live.temperature,
        live.winddirection,
        live.windpower,
        live.humidity,
        live.reporttime
    )
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn description(&self) -> String {
        "Get the current weather for a major Chinese city.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["city"],
            "properties": {
                "city": {
                    "type": "string",
                    "description": "City name in Chinese or English, e.g. 北京 or Beijing"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: WeatherInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        let Some(code) = city_code(&input.city) else {
            return ToolOutput::error(format!(
                "Weather for '{}' is not supported",
                input.city
            ));
        };
        let Some(api_key) = self.api_key.as_deref() else {
            return ToolOutput::error(
                "Weather API key not configured. Set GAODE_WEATHER_API_KEY.",
            );
        };

        tracing::debug!(thread_id = %ctx.thread_id, city = %input.city, code, "Fetching weather");
        let result = tokio::select! {
            () = ctx.cancel.cancelled() => return ToolOutput::error("Cancelled"),
            result = self.fetch(api_key, code) => result,
        };
        match result {
            Ok(live) => ToolOutput::success(describe(&live)),
            Err(e) => ToolOutput::error(format!("Weather lookup for '{}' failed: {e}", input.city)),
        }
    }
}
