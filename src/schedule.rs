use std::collections::HashMap;

/// Default tuition amount per class label. Workspaces can override
/// individual entries through settings; unknown labels resolve to 0,
/// which means "no fee applicable" rather than an error.
pub const DEFAULT_TUITION_FEES: &[(&str, f64)] = &[
    ("Nursery", 15000.0),
    ("LKG", 15000.0),
    ("UKG", 15000.0),
    ("First", 12500.0),
    ("Second", 12500.0),
    ("Third", 13500.0),
    ("Fourth", 13500.0),
    ("Fifth", 14000.0),
    ("Sixth", 14500.0),
    ("Seventh", 14500.0),
    ("Eighth", 16000.0),
    ("Ninth", 17000.0),
    ("Tenth", 19000.0),
    ("11th Arts", 19000.0),
    ("11th Science", 28000.0),
    ("12th Arts", 21000.0),
    ("12th Science", 30000.0),
];

/// Default bus fee per route.
pub const DEFAULT_BUS_FEES: &[(&str, f64)] = &[
    ("None", 0.0),
    ("Local", 2000.0),
    ("Merta Road", 5000.0),
    ("Deswal", 10000.0),
    ("Oladan", 9000.0),
    ("Siradhna", 8500.0),
    ("Gaguda", 8000.0),
    ("Veer Teja Nagar", 7500.0),
    ("Chhapri", 7500.0),
    ("Kumpdas", 7000.0),
    ("Bajado Ki Dhani", 7000.0),
    ("Kolio Ki Dhani", 8000.0),
    ("Riyan Shyamdas", 7500.0),
    ("Jogi Magra", 8500.0),
    ("Jaisas", 8000.0),
    ("Jarora", 7000.0),
    ("Bashni Seja", 7500.0),
    ("Lai", 6500.0),
    ("Gangarda", 6500.0),
    ("Sirsila", 8000.0),
];

#[derive(Debug, Clone)]
pub struct FeeSchedule {
    tuition: HashMap<String, f64>,
    bus: HashMap<String, f64>,
}

impl FeeSchedule {
    pub fn defaults() -> Self {
        Self {
            tuition: DEFAULT_TUITION_FEES
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            bus: DEFAULT_BUS_FEES
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }

    /// Defaults with stored overrides merged on top. Each override value is
    /// an object mapping label to amount; non-numeric entries are skipped.
    pub fn with_overrides(
        tuition_overrides: Option<&serde_json::Value>,
        bus_overrides: Option<&serde_json::Value>,
    ) -> Self {
        let mut schedule = Self::defaults();
        merge_overrides(&mut schedule.tuition, tuition_overrides);
        merge_overrides(&mut schedule.bus, bus_overrides);
        schedule
    }

    pub fn tuition_for(&self, class_label: &str) -> f64 {
        self.tuition.get(class_label).copied().unwrap_or(0.0)
    }

    pub fn bus_for(&self, route: &str) -> f64 {
        self.bus.get(route).copied().unwrap_or(0.0)
    }
}

fn merge_overrides(table: &mut HashMap<String, f64>, overrides: Option<&serde_json::Value>) {
    let Some(obj) = overrides.and_then(|v| v.as_object()) else {
        return;
    };
    for (label, amount) in obj {
        if let Some(n) = amount.as_f64() {
            if n.is_finite() && n >= 0.0 {
                table.insert(label.clone(), n);
            }
        }
    }
}
