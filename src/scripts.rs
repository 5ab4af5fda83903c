//! Page-query procedures injected into the result page
//!
//! Every script renders to a self-invoking expression whose value is plain
//! JSON. Each one opens with a `/* script:<name> */` marker so a log line or
//! a recorded evaluation can be traced back to its procedure.

use crate::codes::DOMESTIC_CARRIERS;

/// `HH:MM - HH:MM` departure/arrival pair
pub const TIME_PATTERN: &str = r"(\d{2}:\d{2})\s*-\s*(\d{2}:\d{2})";
/// Fare text such as `53,900원`
pub const PRICE_PATTERN: &str = r"(\d{1,3},\d{3},?\d{0,3})\s*원";
/// Stop count such as `1회 경유`
pub const STOPS_PATTERN: &str = r"(\d)회\s*경유";

/// Domestic fares outside this range are treated as noise
pub const DOMESTIC_MIN_PRICE: i64 = 1_000;
pub const DOMESTIC_MAX_PRICE: i64 = 10_000_000;

/// Rows the fallback procedure returns at most
pub const FALLBACK_ROW_LIMIT: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptId {
    /// Domestic rows with promotion and price-range filtering
    DomesticList,
    DomesticPrices,
    InternationalPrices,
    InternationalFallback,
    ClickFlight,
    ClickFlightByDetails,
    ScrollCheck,
    ScrollToBottom,
    PageHeight,
    DomesticReturnReady,
    DomesticResultsReady,
    InternationalResultsReady,
    SelectorPresent,
}

impl ScriptId {
    pub fn name(self) -> &'static str {
        match self {
            ScriptId::DomesticList => "domestic_list",
            ScriptId::DomesticPrices => "domestic_prices",
            ScriptId::InternationalPrices => "international_prices",
            ScriptId::InternationalFallback => "international_fallback",
            ScriptId::ClickFlight => "click_flight",
            ScriptId::ClickFlightByDetails => "click_flight_by_details",
            ScriptId::ScrollCheck => "scroll_check",
            ScriptId::ScrollToBottom => "scroll_to_bottom",
            ScriptId::PageHeight => "page_height",
            ScriptId::DomesticReturnReady => "domestic_return_ready",
            ScriptId::DomesticResultsReady => "domestic_results_ready",
            ScriptId::InternationalResultsReady => "international_results_ready",
            ScriptId::SelectorPresent => "selector_present",
        }
    }

    /// Marker embedded at the top of the rendered source
    pub fn marker(self) -> String {
        format!("/* script:{} */", self.name())
    }

    /// Procedures that return flight rows
    pub fn yields_rows(self) -> bool {
        matches!(
            self,
            ScriptId::DomesticList
                | ScriptId::DomesticPrices
                | ScriptId::InternationalPrices
                | ScriptId::InternationalFallback
        )
    }
}

impl std::fmt::Display for ScriptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters a procedure is rendered with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScriptArgs {
    #[default]
    None,
    /// Known carrier names, used to find row boundaries in loose markup
    Carriers(Vec<String>),
    /// Exact flight to click on the outbound list
    Flight {
        airline: String,
        dep_time: String,
        arr_time: String,
        price_text: String,
    },
    /// CSS selector to probe for
    Selector(String),
}

impl ScriptArgs {
    pub fn domestic_carriers() -> Self {
        ScriptArgs::Carriers(DOMESTIC_CARRIERS.iter().map(|c| c.to_string()).collect())
    }

    fn carriers_json(&self) -> String {
        let list: Vec<String> = match self {
            ScriptArgs::Carriers(list) => list.clone(),
            _ => DOMESTIC_CARRIERS.iter().map(|c| c.to_string()).collect(),
        };
        json_literal(&list)
    }
}

/// Render a procedure to an evaluable expression
pub fn render(id: ScriptId, args: &ScriptArgs) -> String {
    let body = match id {
        ScriptId::DomesticList => DOMESTIC_LIST.replace("__CARRIERS__", &args.carriers_json()),
        ScriptId::DomesticPrices => {
            DOMESTIC_PRICES.replace("__CARRIERS__", &args.carriers_json())
        }
        ScriptId::InternationalPrices => INTERNATIONAL_PRICES.to_string(),
        ScriptId::InternationalFallback => INTERNATIONAL_FALLBACK
            .replace("__ROW_LIMIT__", &FALLBACK_ROW_LIMIT.to_string()),
        ScriptId::ClickFlight => CLICK_FLIGHT.replace("__CARRIERS__", &args.carriers_json()),
        ScriptId::ClickFlightByDetails => {
            let (airline, dep, arr, price) = match args {
                ScriptArgs::Flight {
                    airline,
                    dep_time,
                    arr_time,
                    price_text,
                } => (
                    airline.as_str(),
                    dep_time.as_str(),
                    arr_time.as_str(),
                    price_text.as_str(),
                ),
                _ => ("", "", "", ""),
            };
            CLICK_FLIGHT_BY_DETAILS
                .replace("__AIRLINE__", &json_literal(&airline))
                .replace("__DEP__", &json_literal(&dep))
                .replace("__ARR__", &json_literal(&arr))
                .replace("__PRICE__", &json_literal(&price))
        }
        ScriptId::ScrollCheck => SCROLL_CHECK.to_string(),
        ScriptId::ScrollToBottom => SCROLL_TO_BOTTOM.to_string(),
        ScriptId::PageHeight => PAGE_HEIGHT.to_string(),
        ScriptId::DomesticReturnReady => DOMESTIC_RETURN_READY.to_string(),
        ScriptId::DomesticResultsReady => DOMESTIC_RESULTS_READY.to_string(),
        ScriptId::InternationalResultsReady => INTERNATIONAL_RESULTS_READY.to_string(),
        ScriptId::SelectorPresent => {
            let selector = match args {
                ScriptArgs::Selector(selector) => selector.as_str(),
                _ => "",
            };
            SELECTOR_PRESENT.replace("__SELECTOR__", &json_literal(selector))
        }
    };

    let body = body
        .replace("__TIME__", TIME_PATTERN)
        .replace("__PRICE_RE__", PRICE_PATTERN)
        .replace("__STOPS__", STOPS_PATTERN)
        .replace("__MIN_PRICE__", &DOMESTIC_MIN_PRICE.to_string())
        .replace("__MAX_PRICE__", &DOMESTIC_MAX_PRICE.to_string());

    format!("{}\n(() => {{{}}})()", id.marker(), body)
}

/// Fare text as the outbound button shows it, e.g. `53,900원`
pub fn price_text(price: i64) -> String {
    if price <= 0 {
        return String::new();
    }
    let digits = price.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped.push('원');
    grouped
}

fn json_literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

const DOMESTIC_LIST: &str = r#"
    const results = [];
    const airlines = __CARRIERS__;
    for (const btn of document.querySelectorAll('button')) {
        try {
            const text = btn.textContent || '';
            const timeMatch = text.match(/__TIME__/);
            if (!timeMatch) continue;
            const priceMatch = text.match(/__PRICE_RE__/);
            if (!priceMatch) continue;
            const price = parseInt(priceMatch[1].replace(/[^\d]/g, ''));
            if (price < __MIN_PRICE__ || price > __MAX_PRICE__) continue;
            if (text.includes('이벤트') || text.includes('프로모션')) continue;
            let airline = '기타';
            for (const a of airlines) {
                if (text.includes(a)) { airline = a; break; }
            }
            let stops = 0;
            if (text.includes('경유')) {
                const stopMatch = text.match(/__STOPS__/);
                stops = stopMatch ? parseInt(stopMatch[1]) : 1;
            }
            results.push({ airline, price, depTime: timeMatch[1], arrTime: timeMatch[2], stops });
        } catch (e) { }
    }
    return results;
"#;

const DOMESTIC_PRICES: &str = r#"
    const results = [];
    const airlines = __CARRIERS__;
    for (const btn of document.querySelectorAll('button')) {
        try {
            const text = btn.textContent || '';
            const timeMatch = text.match(/__TIME__/);
            if (!timeMatch) continue;
            const priceMatch = text.match(/__PRICE_RE__/);
            if (!priceMatch) continue;
            let airline = '기타';
            for (const a of airlines) {
                if (text.includes(a)) { airline = a; break; }
            }
            let stops = 0;
            if (text.includes('경유')) {
                const stopMatch = text.match(/__STOPS__/);
                stops = stopMatch ? parseInt(stopMatch[1]) : 1;
            }
            const price = parseInt(priceMatch[1].replace(/,/g, ''));
            results.push({ airline, price, depTime: timeMatch[1], arrTime: timeMatch[2], stops });
        } catch (e) { }
    }
    return results;
"#;

const INTERNATIONAL_PRICES: &str = r#"
    const results = [];
    for (const card of document.querySelectorAll('li[data-index]')) {
        try {
            const spans = Array.from(card.querySelectorAll('span'));
            const priceEl = spans.find(el => /^[0-9,]+\s*원$/.test(el.textContent.trim()));
            if (!priceEl) continue;
            const price = parseInt(priceEl.textContent.replace(/[^0-9]/g, ''));
            const times = spans
                .filter(el => /^\d{2}:\d{2}$/.test(el.textContent.trim()))
                .map(el => el.textContent.trim());
            if (times.length < 2) continue;
            const logos = card.querySelectorAll('img[alt$="로고"]');
            const airline = logos.length > 0 ? logos[0].alt.replace(' 로고', '') : '기타';
            const cardText = card.textContent;
            let stops = 1;
            let retStops = 1;
            const stopMatches = cardText.match(/__STOPS__/g);
            if (stopMatches) {
                stops = parseInt(stopMatches[0].replace(/[^0-9]/g, ''));
                retStops = stopMatches.length > 1
                    ? parseInt(stopMatches[1].replace(/[^0-9]/g, ''))
                    : stops;
            } else if (cardText.includes('직항')) {
                stops = 0;
                retStops = 0;
            }
            const isRoundTrip = times.length >= 4;
            results.push({
                airline, price,
                depTime: times[0], arrTime: times[1], stops,
                retDepTime: isRoundTrip ? times[2] : '',
                retArrTime: isRoundTrip ? times[3] : '',
                retStops: isRoundTrip ? retStops : 0,
                isRoundTrip,
            });
        } catch (e) { }
    }
    return results;
"#;

const INTERNATIONAL_FALLBACK: &str = r#"
    const results = [];
    const candidates = document.querySelectorAll(
        'li[data-index], div[data-index], li[class*="result"], div[class*="result"], li[class*="ticket"], div[class*="ticket"]'
    );
    for (const card of candidates) {
        try {
            const text = card.textContent || '';
            const priceMatch = text.match(/__PRICE_RE__/);
            if (!priceMatch) continue;
            const price = parseInt(priceMatch[1].replace(/[^0-9]/g, ''));
            const times = [];
            for (const t of (text.match(/__TIME__/g) || [])) {
                const parts = t.match(/__TIME__/);
                if (parts && parts.length >= 3) times.push(parts[1], parts[2]);
            }
            if (times.length < 2) continue;
            const logos = card.querySelectorAll('img[alt]');
            const airline = logos.length > 0 ? logos[0].alt.replace(' 로고', '').trim() : '기타';
            let stops = 1;
            let retStops = 1;
            const stopMatches = text.match(/__STOPS__/g);
            if (stopMatches) {
                stops = parseInt(stopMatches[0].replace(/[^0-9]/g, ''));
                retStops = stopMatches.length > 1
                    ? parseInt(stopMatches[1].replace(/[^0-9]/g, ''))
                    : stops;
            } else if (text.includes('직항')) {
                stops = 0;
                retStops = 0;
            }
            const isRoundTrip = times.length >= 4;
            results.push({
                airline, price,
                depTime: times[0], arrTime: times[1], stops,
                retDepTime: isRoundTrip ? times[2] : '',
                retArrTime: isRoundTrip ? times[3] : '',
                retStops: isRoundTrip ? retStops : 0,
                isRoundTrip,
            });
            if (results.length >= __ROW_LIMIT__) break;
        } catch (e) { }
    }
    return results;
"#;

const CLICK_FLIGHT: &str = r#"
    const airlines = __CARRIERS__;
    for (const btn of document.querySelectorAll('button')) {
        const text = btn.textContent || '';
        if (/__TIME__/.test(text) && /[0-9,]+\s*원/.test(text) && airlines.some(a => text.includes(a))) {
            btn.click();
            return true;
        }
    }
    return false;
"#;

const CLICK_FLIGHT_BY_DETAILS: &str = r#"
    const airline = __AIRLINE__;
    const dep = __DEP__;
    const arr = __ARR__;
    const priceText = __PRICE__;
    for (const btn of document.querySelectorAll('button')) {
        const text = btn.textContent || '';
        if (airline && !text.includes(airline)) continue;
        if (dep && !text.includes(dep)) continue;
        if (arr && !text.includes(arr)) continue;
        if (priceText && !text.includes(priceText)) continue;
        btn.click();
        return true;
    }
    return false;
"#;

const SCROLL_CHECK: &str = r#"
    const beforeScroll = window.scrollY;
    const beforeHeight = document.body.scrollHeight;
    const atBottom = (document.body.scrollHeight - (window.scrollY + window.innerHeight)) <= 5;
    if (!atBottom) {
        window.scrollBy(0, 500);
    } else {
        const containers = [
            document.querySelector('div[scrollable="true"]'),
            document.querySelector('[class*="flightList"]'),
            document.querySelector('[class*="resultList"]'),
            document.querySelector('.ReactVirtualizados'),
            document.querySelector('div[style*="overflow"]'),
        ];
        for (const c of containers) {
            if (c && c.scrollHeight > c.clientHeight
                && (c.scrollHeight - c.scrollTop - c.clientHeight) > 5) {
                c.scrollTop += 500;
                break;
            }
        }
    }
    const canScroll = window.scrollY !== beforeScroll || document.body.scrollHeight !== beforeHeight;
    const reachedBottom = (document.body.scrollHeight - (window.scrollY + window.innerHeight)) <= 5;
    return { canScroll, reachedBottom: reachedBottom && !canScroll };
"#;

const SCROLL_TO_BOTTOM: &str = r#"
    window.scrollTo(0, document.body.scrollHeight);
    return document.body.scrollHeight;
"#;

const PAGE_HEIGHT: &str = r#"
    return document.body ? document.body.scrollHeight : 0;
"#;

const DOMESTIC_RETURN_READY: &str = r#"
    const bodyText = (document.body && document.body.innerText) || '';
    let priceCount = 0;
    for (const node of document.querySelectorAll('button, li, span')) {
        if (/\d{1,3}(,\d{3})+\s*원/.test(node.textContent || '')) {
            priceCount += 1;
            if (priceCount >= 5) break;
        }
    }
    return bodyText.includes('오는편') && priceCount >= 5;
"#;

const DOMESTIC_RESULTS_READY: &str = r#"
    for (const btn of document.querySelectorAll('button')) {
        if (/\d{1,3}(,\d{3})+\s*원/.test(btn.textContent || '')) return true;
    }
    return false;
"#;

const INTERNATIONAL_RESULTS_READY: &str = r#"
    if (document.querySelector('li[data-index]')) return true;
    const bodyText = (document.body && document.body.innerText) || '';
    return /\d{1,3}(,\d{3})+\s*원/.test(bodyText);
"#;

const SELECTOR_PRESENT: &str = r#"
    const selector = __SELECTOR__;
    try {
        return !!(selector && document.querySelector(selector));
    } catch (e) {
        return false;
    }
"#;
