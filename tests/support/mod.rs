//! Scripted stand-in for a browser engine
//!
//! Script responses are keyed by the procedure name found in the marker
//! comment of every rendered expression. A name maps to a queue of values;
//! the last value repeats once the queue runs dry, unknown names yield null.
//! A separate set of responses takes over after a click procedure reports
//! success, which is how the domestic return screen is modelled.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use fare_scout::{
    BrowserBackend, BrowserError, BrowserResult, Config, Engine, LaunchOptions, Launcher,
    ScraperConfig, SessionMode,
};

#[derive(Default)]
struct FakeState {
    failing_engines: HashSet<Engine>,
    goto_failures: u32,
    responses: HashMap<String, VecDeque<Value>>,
    after_click: HashMap<String, VecDeque<Value>>,
    cancel_on: Option<(String, CancellationToken)>,
    panic_on_url: Option<String>,

    launches: Vec<Engine>,
    modes: Vec<SessionMode>,
    navigations: Vec<String>,
    evaluations: Vec<String>,
    blocked: Vec<String>,
    close_steps: Vec<&'static str>,
}

/// Launcher and recorder shared by every backend it hands out
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launcher(&self) -> Arc<dyn Launcher> {
        Arc::new(self.clone())
    }

    pub fn fail_engine(&self, engine: Engine) -> &Self {
        self.state.lock().failing_engines.insert(engine);
        self
    }

    pub fn fail_all_engines(&self) -> &Self {
        for engine in Engine::PRIORITY {
            self.fail_engine(engine);
        }
        self
    }

    /// Fail the next `n` navigations with a connection error
    pub fn fail_navigations(&self, n: u32) -> &Self {
        self.state.lock().goto_failures = n;
        self
    }

    pub fn respond(&self, script: &str, value: Value) -> &Self {
        self.respond_seq(script, vec![value])
    }

    pub fn respond_seq(&self, script: &str, values: Vec<Value>) -> &Self {
        self.state
            .lock()
            .responses
            .insert(script.to_string(), values.into());
        self
    }

    /// Response used once a click procedure returned true
    pub fn respond_after_click(&self, script: &str, value: Value) -> &Self {
        self.state
            .lock()
            .after_click
            .insert(script.to_string(), VecDeque::from(vec![value]));
        self
    }

    /// Cancel `token` when `script` is evaluated
    pub fn cancel_on(&self, script: &str, token: CancellationToken) -> &Self {
        self.state.lock().cancel_on = Some((script.to_string(), token));
        self
    }

    /// Panic the worker whose navigation URL contains `fragment`
    pub fn panic_on_url(&self, fragment: &str) -> &Self {
        self.state.lock().panic_on_url = Some(fragment.to_string());
        self
    }

    pub fn launches(&self) -> Vec<Engine> {
        self.state.lock().launches.clone()
    }

    pub fn modes(&self) -> Vec<SessionMode> {
        self.state.lock().modes.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    pub fn evaluations(&self) -> Vec<String> {
        self.state.lock().evaluations.clone()
    }

    pub fn evaluation_count(&self, script: &str) -> usize {
        self.state
            .lock()
            .evaluations
            .iter()
            .filter(|name| name.as_str() == script)
            .count()
    }

    pub fn blocked(&self) -> Vec<String> {
        self.state.lock().blocked.clone()
    }

    pub fn close_steps(&self) -> Vec<&'static str> {
        self.state.lock().close_steps.clone()
    }
}

#[async_trait]
impl Launcher for FakeBrowser {
    async fn launch(
        &self,
        engine: Engine,
        options: &LaunchOptions,
    ) -> BrowserResult<Box<dyn BrowserBackend>> {
        let mut state = self.state.lock();
        state.launches.push(engine);
        if state.failing_engines.contains(&engine) {
            return Err(BrowserError::NotFound(format!("{engine} is not installed")));
        }
        state.modes.push(options.mode.clone());
        Ok(Box::new(FakeBackend {
            state: self.state.clone(),
            clicked: false,
        }))
    }
}

struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    clicked: bool,
}

fn script_name(expression: &str) -> String {
    expression
        .split("/* script:")
        .nth(1)
        .and_then(|rest| rest.split(" */").next())
        .unwrap_or_default()
        .to_string()
}

fn next_value(queue: &mut VecDeque<Value>) -> Value {
    if queue.len() > 1 {
        queue.pop_front().unwrap_or(Value::Null)
    } else {
        queue.front().cloned().unwrap_or(Value::Null)
    }
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    async fn block_urls(&mut self, patterns: &[String]) -> BrowserResult<()> {
        self.state.lock().blocked.extend(patterns.iter().cloned());
        Ok(())
    }

    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        let mut state = self.state.lock();
        state.navigations.push(url.to_string());
        if let Some(fragment) = &state.panic_on_url
            && url.contains(fragment.as_str())
        {
            drop(state);
            panic!("renderer crashed on {url}");
        }
        if state.goto_failures > 0 {
            state.goto_failures -= 1;
            return Err(BrowserError::NavigationFailed("net::ERR_CONNECTION_RESET".into()));
        }
        Ok(())
    }

    async fn evaluate(&mut self, expression: &str) -> BrowserResult<Value> {
        let name = script_name(expression);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.evaluations.push(name.clone());

        if let Some((trigger, token)) = &state.cancel_on
            && *trigger == name
        {
            token.cancel();
        }

        let value = if self.clicked
            && let Some(queue) = state.after_click.get_mut(&name)
        {
            next_value(queue)
        } else {
            match state.responses.get_mut(&name) {
                Some(queue) => next_value(queue),
                None => Value::Null,
            }
        };

        if name.starts_with("click_flight") && value == Value::Bool(true) {
            self.clicked = true;
        }
        Ok(value)
    }

    async fn close_page(&mut self) -> BrowserResult<()> {
        self.state.lock().close_steps.push("page");
        Ok(())
    }

    async fn close_context(&mut self) -> BrowserResult<()> {
        self.state.lock().close_steps.push("context");
        Ok(())
    }

    /// Fails, so the controller step must still be attempted
    async fn close_browser(&mut self) -> BrowserResult<()> {
        self.state.lock().close_steps.push("browser");
        Err(BrowserError::Closed)
    }

    async fn shutdown_controller(&mut self) -> BrowserResult<()> {
        self.state.lock().close_steps.push("controller");
        Ok(())
    }
}

/// Defaults with every wait collapsed so tests run instantly
pub fn test_config() -> Config {
    Config {
        scraper: ScraperConfig::immediate(),
        ..Config::default()
    }
}

pub fn row(airline: &str, price: i64, dep: &str, arr: &str) -> Value {
    json!({
        "airline": airline,
        "price": price,
        "depTime": dep,
        "arrTime": arr,
        "stops": 0,
    })
}

/// International page showing `rows` with a stable page height
pub fn international_page(fake: &FakeBrowser, rows: Vec<Value>) {
    fake.respond("international_results_ready", json!(true))
        .respond("international_prices", Value::Array(rows))
        .respond("page_height", json!(4200));
}

/// Domestic list that fits on screen: nothing to scroll, bottom reached
pub fn domestic_page(fake: &FakeBrowser, outbound: Vec<Value>) {
    fake.respond("domestic_results_ready", json!(true))
        .respond("domestic_list", Value::Array(outbound.clone()))
        .respond("domestic_prices", Value::Array(outbound))
        .respond("scroll_check", json!({"canScroll": false, "reachedBottom": true}));
}
