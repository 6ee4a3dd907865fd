//! Per-instruction trace records and their line formatting.

use crate::access::AccessKind;

/// One memory event inside a retired instruction.
#[derive(Debug, Clone, Copy)]
pub struct MemEvent {
    pub kind: AccessKind,
    pub address: u64,
    pub size: u32,
    pub data: u64,
    pub latency_cycles: u32,
}

/// Branch outcome and prediction as reported by the executor. The
/// controller treats these fields as opaque.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchInfo {
    pub taken: bool,
    pub target: u64,
    pub predicted_taken: bool,
    pub predicted_target: u64,
}

/// Record of one retired instruction. Immutable after emission.
#[derive(Debug, Clone, Default)]
pub struct TraceRecord {
    pub pc: u64,
    pub inst: u32,
    pub decoded: String,
    pub cycle_begin: u64,
    pub cycle_end: u64,
    pub mem_events: Vec<MemEvent>,
    pub is_branch: bool,
    pub branch: BranchInfo,
    /// Free-form key/value fields for executor-specific detail.
    pub extra: Vec<(String, String)>,
}

/// Which trace categories the controller honors. The executor reports
/// records; the controller decides what a line contains.
#[derive(Debug, Clone, Copy)]
pub struct TraceOptions {
    pub log_instruction: bool,
    pub log_mem_events: bool,
    pub log_branch_prediction: bool,
}

impl TraceOptions {
    /// True when any category is enabled.
    #[must_use]
    pub fn any(&self) -> bool {
        self.log_instruction || self.log_mem_events || self.log_branch_prediction
    }

    #[must_use]
    pub fn none() -> Self {
        Self {
            log_instruction: false,
            log_mem_events: false,
            log_branch_prediction: false,
        }
    }
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            log_instruction: true,
            log_mem_events: true,
            log_branch_prediction: true,
        }
    }
}

/// A custom formatter receives the full record and the active options.
pub type TraceFormatter = Box<dyn Fn(&TraceRecord, &TraceOptions) -> String + Send + Sync>;

/// Renders the default space-separated trace line. Returns an empty
/// string when no enabled category applies to the record.
#[must_use]
pub fn format_record(record: &TraceRecord, options: &TraceOptions) -> String {
    let mut line = String::new();

    if options.log_instruction {
        line.push_str(&format!(
            "PC:0x{:08x} Inst:0x{:08x} ({})",
            record.pc, record.inst, record.decoded
        ));
    }

    if options.log_branch_prediction && record.is_branch {
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&format!(
            "BP:(T:{} P:{} Target:0x{:x} PTarget:0x{:x})",
            u8::from(record.branch.taken),
            u8::from(record.branch.predicted_taken),
            record.branch.target,
            record.branch.predicted_target
        ));
    }

    if options.log_mem_events {
        let events: Vec<String> = record
            .mem_events
            .iter()
            .filter(|e| e.kind != AccessKind::Fetch)
            .map(|e| {
                let tag = match e.kind {
                    AccessKind::Read => 'R',
                    AccessKind::Write => 'W',
                    AccessKind::Fetch => unreachable!(),
                };
                format!("{}:0x{:x}=0x{:x}", tag, e.address, e.data)
            })
            .collect();
        if !events.is_empty() {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&format!("Mem:[{}]", events.join(", ")));
        }
    }

    line
}

fn parse_number(text: &str) -> u64 {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).unwrap_or(0);
    }
    let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

fn access_name(kind: AccessKind) -> &'static str {
    match kind {
        AccessKind::Read => "read",
        AccessKind::Write => "write",
        AccessKind::Fetch => "fetch",
    }
}

/// Appends summary metrics to a record's extra fields: total device
/// latency, per-kind access counts, a normalized `pc_norm` when a `pc`
/// extra field is present, and one `mem_<kind>` address field per event.
pub fn append_metrics(record: &mut TraceRecord) {
    let latency: u64 = record
        .mem_events
        .iter()
        .map(|e| u64::from(e.latency_cycles))
        .sum();
    let count = |kind: AccessKind| {
        record
            .mem_events
            .iter()
            .filter(|e| e.kind == kind)
            .count()
            .to_string()
    };

    record
        .extra
        .push(("mem_latency".to_string(), latency.to_string()));
    record
        .extra
        .push(("mem_reads".to_string(), count(AccessKind::Read)));
    record
        .extra
        .push(("mem_writes".to_string(), count(AccessKind::Write)));
    record
        .extra
        .push(("mem_fetches".to_string(), count(AccessKind::Fetch)));

    let pc_field = record
        .extra
        .iter()
        .find(|(key, _)| key == "pc")
        .map(|(_, value)| parse_number(value));
    if let Some(pc) = pc_field {
        if pc != 0 {
            record.extra.push(("pc_norm".to_string(), format!("0x{pc:x}")));
        }
    }

    let addresses: Vec<(String, String)> = record
        .mem_events
        .iter()
        .map(|e| {
            (
                format!("mem_{}", access_name(e.kind)),
                format!("0x{:x}", e.address),
            )
        })
        .collect();
    record.extra.extend(addresses);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> TraceRecord {
        TraceRecord {
            pc: 0x1000,
            inst: 0x0102_0304,
            decoded: "ori r2, 0x304".to_string(),
            cycle_begin: 10,
            cycle_end: 12,
            mem_events: vec![
                MemEvent {
                    kind: AccessKind::Fetch,
                    address: 0x1000,
                    size: 4,
                    data: 0x0102_0304,
                    latency_cycles: 1,
                },
                MemEvent {
                    kind: AccessKind::Write,
                    address: 0x8000_0000,
                    size: 4,
                    data: 0x55,
                    latency_cycles: 2,
                },
            ],
            ..TraceRecord::default()
        }
    }

    #[test]
    fn default_line_includes_pc_and_instruction() {
        let record = sample_record();
        let line = format_record(&record, &TraceOptions::default());
        assert!(line.starts_with("PC:0x00001000 Inst:0x01020304 (ori r2, 0x304)"));
    }

    #[test]
    fn mem_section_excludes_fetches() {
        let record = sample_record();
        let line = format_record(&record, &TraceOptions::default());
        assert!(line.contains("Mem:[W:0x80000000=0x55]"));
        assert!(!line.contains("0x1000="));
    }

    #[test]
    fn branch_section_renders_prediction() {
        let mut record = sample_record();
        record.is_branch = true;
        record.branch = BranchInfo {
            taken: true,
            target: 0x2000,
            predicted_taken: false,
            predicted_target: 0x1004,
        };
        let line = format_record(&record, &TraceOptions::default());
        assert!(line.contains("BP:(T:1 P:0 Target:0x2000 PTarget:0x1004)"));
    }

    #[test]
    fn disabled_options_produce_empty_line() {
        let record = sample_record();
        assert!(format_record(&record, &TraceOptions::none()).is_empty());
    }

    #[test]
    fn metrics_summarize_events() {
        let mut record = sample_record();
        record.extra.push(("pc".to_string(), "0x1000".to_string()));
        append_metrics(&mut record);

        let get = |key: &str| {
            record
                .extra
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("mem_latency").as_deref(), Some("3"));
        assert_eq!(get("mem_reads").as_deref(), Some("0"));
        assert_eq!(get("mem_writes").as_deref(), Some("1"));
        assert_eq!(get("mem_fetches").as_deref(), Some("1"));
        assert_eq!(get("pc_norm").as_deref(), Some("0x1000"));
        assert_eq!(get("mem_write").as_deref(), Some("0x80000000"));
    }
}
