//! Airport, city and carrier catalogs for the Interpark search flow

/// Display names for the airports offered by default
pub const AIRPORTS: &[(&str, &str)] = &[
    ("ICN", "Incheon"),
    ("GMP", "Gimpo"),
    ("CJU", "Jeju"),
    ("PUS", "Busan Gimhae"),
    ("TAE", "Daegu"),
    ("NRT", "Tokyo Narita"),
    ("HND", "Tokyo Haneda"),
    ("KIX", "Osaka Kansai"),
    ("FUK", "Fukuoka"),
    ("BKK", "Bangkok"),
    ("SIN", "Singapore"),
    ("HKG", "Hong Kong"),
    ("SGN", "Ho Chi Minh City"),
    ("DAD", "Da Nang"),
    ("DPS", "Bali (Denpasar)"),
];

/// Airport code to the city code the search site expects.
///
/// Codes listed here are sent with the `c` prefix, everything else with `a`.
const CITY_CODES: &[(&str, &str)] = &[
    ("ICN", "SEL"),
    ("GMP", "SEL"),
    ("NRT", "TYO"),
    ("HND", "TYO"),
    ("KIX", "OSA"),
    ("FUK", "FUK"),
    ("CJU", "CJU"),
    ("PUS", "PUS"),
    ("BKK", "BKK"),
    ("SIN", "SIN"),
    ("HKG", "HKG"),
    ("SGN", "SGN"),
    ("DAD", "DAD"),
    ("DPS", "DPS"),
];

/// In-country airports and city codes that make a search domestic
pub const DOMESTIC_AIRPORTS: &[&str] = &["ICN", "GMP", "CJU", "PUS", "TAE", "SEL"];

/// Carrier names as they appear in domestic result rows
pub const DOMESTIC_CARRIERS: &[&str] = &[
    "대한항공",
    "아시아나",
    "제주항공",
    "진에어",
    "티웨이",
    "에어부산",
    "에어서울",
    "이스타항공",
    "하이에어",
    "에어프레미아",
    "플라이강원",
];

const LOW_COST_CARRIERS: &[&str] = &[
    "진에어", "제주항공", "티웨이항공", "에어부산", "에어서울", "이스타항공", "피치항공", "젯스타",
    "스쿠트", "에어아시아", "세부퍼시픽", "비엣젯", "스프링항공", "ZipAir", "Air Busan", "Jin Air",
    "T'way", "Jeju Air",
];

const FULL_SERVICE_CARRIERS: &[&str] = &[
    "대한항공",
    "아시아나항공",
    "일본항공",
    "전일본공수",
    "JAL",
    "ANA",
    "캐세이퍼시픽",
    "싱가포르항공",
    "타이항공",
    "베트남항공",
    "Korean Air",
    "Asiana",
    "Cathay Pacific",
    "Singapore Airlines",
];

/// Placeholder carrier name used by the page scripts when no carrier matched
pub const UNKNOWN_CARRIER: &str = "기타";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirlineCategory {
    LowCost,
    FullService,
    Other,
}

impl AirlineCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            AirlineCategory::LowCost => "LCC",
            AirlineCategory::FullService => "FSC",
            AirlineCategory::Other => "OTHER",
        }
    }

    /// `lcc`, `fsc` or `other`, any case
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "LCC" => Some(AirlineCategory::LowCost),
            "FSC" => Some(AirlineCategory::FullService),
            "OTHER" => Some(AirlineCategory::Other),
            _ => None,
        }
    }
}

/// Three ASCII letters, surrounding whitespace ignored
pub fn validate_airport_code(code: &str) -> bool {
    let code = code.trim();
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

/// City code for an airport, if the site groups it under a city
pub fn city_code(airport: &str) -> Option<&'static str> {
    let airport = airport.to_ascii_uppercase();
    CITY_CODES
        .iter()
        .find(|(a, _)| *a == airport)
        .map(|(_, city)| *city)
}

/// Code is in the domestic set, directly or through its city code
pub fn is_domestic_code(code: &str) -> bool {
    let upper = code.to_ascii_uppercase();
    let mapped = city_code(&upper).unwrap_or(upper.as_str()).to_string();
    DOMESTIC_AIRPORTS.contains(&upper.as_str()) || DOMESTIC_AIRPORTS.contains(&mapped.as_str())
}

pub fn airport_name(code: &str) -> Option<&'static str> {
    let upper = code.to_ascii_uppercase();
    AIRPORTS
        .iter()
        .find(|(c, _)| *c == upper)
        .map(|(_, name)| *name)
}

pub fn airline_category(airline: &str) -> AirlineCategory {
    let needle = airline.trim().to_lowercase();
    if needle.is_empty() {
        return AirlineCategory::Other;
    }
    let matches = |list: &[&str]| {
        list.iter().any(|a| {
            let a = a.to_lowercase();
            a.contains(&needle) || needle.contains(&a)
        })
    };
    if matches(LOW_COST_CARRIERS) {
        AirlineCategory::LowCost
    } else if matches(FULL_SERVICE_CARRIERS) {
        AirlineCategory::FullService
    } else {
        AirlineCategory::Other
    }
}
