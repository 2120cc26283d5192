use regex_lite::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

/// On-disk template: an ordered list of top-level groups
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    #[serde(default)]
    pub name: String,
    pub groups: Vec<GroupSpec>,
}

/// A group turns every line matching `start` into one record.
///
/// A record's body runs until `end` (consumed), the next `start` (not consumed)
/// or the end of the search region. `scope` narrows the search region to the
/// lines between an `open` and a `close` line.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSpec {
    pub key: String,
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub scope: Option<ScopeSpec>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub set: Vec<SetSpec>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopeSpec {
    pub open: String,
    pub close: String,
}

/// Assign a constant to `field` when a body line matches `pattern`
#[derive(Debug, Clone, Deserialize)]
pub struct SetSpec {
    pub pattern: String,
    pub field: String,
    pub value: Value,
}

/// Template with all regexes compiled
#[derive(Debug)]
pub struct CompiledTemplate {
    pub name: String,
    groups: Vec<CompiledGroup>,
}

#[derive(Debug)]
struct CompiledGroup {
    key: String,
    start: Regex,
    end: Option<Regex>,
    scope: Option<(Regex, Regex)>,
    fields: Vec<Regex>,
    set: Vec<(Regex, String, Value)>,
    defaults: Map<String, Value>,
    groups: Vec<CompiledGroup>,
}

fn compile(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| format!("bad pattern {:?}: {}", pattern, e))
}

impl CompiledTemplate {
    pub fn compile(spec: &TemplateSpec) -> Result<Self, String> {
        let groups = spec
            .groups
            .iter()
            .map(CompiledGroup::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: spec.name.clone(),
            groups,
        })
    }

    /// Run every top-level group over `text`.
    /// Returns None when no group produced a record.
    pub fn parse(&self, text: &str) -> Option<Value> {
        let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
        let mut out = Map::new();
        for group in &self.groups {
            let (records, _) = group.run(&lines);
            if let Some(value) = shape(records) {
                out.insert(group.key.clone(), value);
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(Value::Object(out))
        }
    }
}

impl CompiledGroup {
    fn compile(spec: &GroupSpec) -> Result<Self, String> {
        Ok(Self {
            key: spec.key.clone(),
            start: compile(&spec.start)?,
            end: spec.end.as_deref().map(compile).transpose()?,
            scope: match &spec.scope {
                Some(s) => Some((compile(&s.open)?, compile(&s.close)?)),
                None => None,
            },
            fields: spec
                .fields
                .iter()
                .map(|f| compile(f))
                .collect::<Result<Vec<_>, _>>()?,
            set: spec
                .set
                .iter()
                .map(|s| Ok((compile(&s.pattern)?, s.field.clone(), s.value.clone())))
                .collect::<Result<Vec<_>, String>>()?,
            defaults: spec.defaults.clone(),
            groups: spec
                .groups
                .iter()
                .map(CompiledGroup::compile)
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    /// Search regions: the whole slice, or each open/close window when scoped
    fn regions(&self, lines: &[&str], consumed: &mut [bool]) -> Vec<(usize, usize)> {
        let Some((open, close)) = &self.scope else {
            return vec![(0, lines.len())];
        };

        let mut regions = Vec::new();
        let mut opened_at: Option<usize> = None;
        for (i, line) in lines.iter().enumerate() {
            match opened_at {
                None if open.is_match(line) => {
                    consumed[i] = true;
                    opened_at = Some(i + 1);
                }
                Some(lo) if close.is_match(line) => {
                    consumed[i] = true;
                    regions.push((lo, i));
                    opened_at = None;
                }
                _ => {}
            }
        }
        if let Some(lo) = opened_at {
            regions.push((lo, lines.len()));
        }
        for &(lo, hi) in &regions {
            consumed[lo..hi].iter_mut().for_each(|c| *c = true);
        }
        regions
    }

    /// Extract records from `lines`, reporting which lines they used
    fn run(&self, lines: &[&str]) -> (Vec<Map<String, Value>>, Vec<bool>) {
        let mut consumed = vec![false; lines.len()];
        let mut records = Vec::new();

        for (lo, hi) in self.regions(lines, &mut consumed) {
            let mut i = lo;
            while i < hi {
                let Some(caps) = self.start.captures(lines[i]) else {
                    i += 1;
                    continue;
                };
                let mut record = captures_to_map(&self.start, &caps);

                let mut j = i + 1;
                let mut next = hi;
                let mut body_end = hi;
                while j < hi {
                    if self.end.as_ref().is_some_and(|end| end.is_match(lines[j])) {
                        body_end = j;
                        next = j + 1;
                        break;
                    }
                    if self.start.is_match(lines[j]) {
                        body_end = j;
                        next = j;
                        break;
                    }
                    j += 1;
                }

                consumed[i..next].iter_mut().for_each(|c| *c = true);
                self.fill_record(&mut record, &lines[i + 1..body_end]);
                records.push(record);
                i = next;
            }
        }

        (records, consumed)
    }

    fn fill_record(&self, record: &mut Map<String, Value>, body: &[&str]) {
        let mut taken = vec![false; body.len()];

        for child in &self.groups {
            let (children, used) = child.run(body);
            for (t, u) in taken.iter_mut().zip(used) {
                *t |= u;
            }
            if let Some(value) = shape(children) {
                record.insert(child.key.clone(), value);
            }
        }

        for (line, _) in body.iter().zip(&taken).filter(|(_, t)| !**t) {
            for field in &self.fields {
                if let Some(caps) = field.captures(line) {
                    for (name, value) in captures_to_map(field, &caps) {
                        record.entry(name).or_insert(value);
                    }
                }
            }
            for (pattern, field, value) in &self.set {
                if pattern.is_match(line) {
                    record.insert(field.clone(), value.clone());
                }
            }
        }

        for (key, value) in &self.defaults {
            record.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

fn captures_to_map(re: &Regex, caps: &regex_lite::Captures<'_>) -> Map<String, Value> {
    re.capture_names()
        .flatten()
        .filter_map(|name| {
            caps.name(name)
                .map(|m| (name.to_string(), Value::String(m.as_str().trim().to_string())))
        })
        .collect()
}

/// One record becomes an object, several become an array, none become nothing
fn shape(mut records: Vec<Map<String, Value>>) -> Option<Value> {
    match records.len() {
        0 => None,
        1 => records.pop().map(Value::Object),
        _ => Some(Value::Array(records.into_iter().map(Value::Object).collect())),
    }
}
