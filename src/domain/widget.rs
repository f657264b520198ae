// Widget data - live payloads resolved against a template's display kind
use super::template::WidgetType;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WidgetDataError {
    #[error("{kind:?} widget expects an array of row objects, got {found}")]
    NotRows { kind: WidgetType, found: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub category: Value,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesData {
    /// First key of the first row; used as the x-axis
    pub category_key: String,
    pub value_keys: Vec<String>,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PieSlice {
    pub name: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WidgetData {
    Table {
        columns: Vec<String>,
        rows: Vec<Map<String, Value>>,
    },
    LineChart(SeriesData),
    BarChart(SeriesData),
    PieChart {
        slices: Vec<PieSlice>,
    },
    Number {
        value: Option<f64>,
    },
    Text {
        text: Option<String>,
    },
}

impl WidgetData {
    pub fn resolve(kind: WidgetType, data: &Value) -> Result<Self, WidgetDataError> {
        match kind {
            WidgetType::Table => {
                let rows = rows(kind, data)?;
                let columns = rows
                    .first()
                    .map(|row| row.keys().cloned().collect())
                    .unwrap_or_default();
                Ok(WidgetData::Table { columns, rows })
            }
            WidgetType::LineChart => Ok(WidgetData::LineChart(series(&rows(kind, data)?))),
            WidgetType::BarChart => Ok(WidgetData::BarChart(series(&rows(kind, data)?))),
            WidgetType::PieChart => Ok(WidgetData::PieChart {
                slices: slices(&rows(kind, data)?),
            }),
            WidgetType::Number => Ok(WidgetData::Number {
                value: first_value(data).and_then(as_number),
            }),
            WidgetType::Text => Ok(WidgetData::Text {
                text: first_value(data).map(|value| match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            WidgetData::Table { rows, .. } => rows.is_empty(),
            WidgetData::LineChart(series) | WidgetData::BarChart(series) => series.points.is_empty(),
            WidgetData::PieChart { slices } => slices.is_empty(),
            WidgetData::Number { value } => value.is_none(),
            WidgetData::Text { text } => text.as_deref().is_none_or(str::is_empty),
        }
    }
}

fn rows(kind: WidgetType, data: &Value) -> Result<Vec<Map<String, Value>>, WidgetDataError> {
    match data {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row.clone()),
                other => Err(WidgetDataError::NotRows {
                    kind,
                    found: type_name(other),
                }),
            })
            .collect(),
        other => Err(WidgetDataError::NotRows {
            kind,
            found: type_name(other),
        }),
    }
}

fn series(rows: &[Map<String, Value>]) -> SeriesData {
    let keys: Vec<String> = rows
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();
    let (category_key, value_keys) = match keys.split_first() {
        Some((first, rest)) => (first.clone(), rest.to_vec()),
        None => (String::new(), Vec::new()),
    };

    let points = rows
        .iter()
        .map(|row| SeriesPoint {
            category: row.get(&category_key).cloned().unwrap_or(Value::Null),
            values: value_keys
                .iter()
                .map(|key| row.get(key).and_then(as_number))
                .collect(),
        })
        .collect();

    SeriesData {
        category_key,
        value_keys,
        points,
    }
}

fn slices(rows: &[Map<String, Value>]) -> Vec<PieSlice> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };

    if first.contains_key("name") && first.contains_key("value") {
        return rows
            .iter()
            .map(|row| PieSlice {
                name: label(row.get("name")),
                value: row.get("value").and_then(as_number),
            })
            .collect();
    }

    let keys: Vec<&String> = first.keys().collect();
    if keys.len() < 2 {
        return Vec::new();
    }
    rows.iter()
        .map(|row| PieSlice {
            name: label(row.get(keys[0])),
            value: row.get(keys[1]).and_then(as_number),
        })
        .collect()
}

/// Scalar data as-is, otherwise the first element (or the first value of the first row)
fn first_value(data: &Value) -> Option<&Value> {
    match data {
        Value::Null => None,
        Value::Array(items) => match items.first()? {
            Value::Object(row) => row.values().next(),
            item => Some(item),
        },
        other => Some(other),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn label(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_line_chart_uses_first_key_as_category() {
        let data = json!([
            { "month": "Jan", "revenue": 100, "costs": "40.5" },
            { "month": "Feb", "revenue": 120, "costs": "n/a" }
        ]);

        let WidgetData::LineChart(series) = WidgetData::resolve(WidgetType::LineChart, &data).unwrap() else {
            panic!("expected line chart");
        };
        assert_eq!(series.category_key, "month");
        assert_eq!(series.value_keys, vec!["revenue", "costs"]);
        assert_eq!(series.points[0].values, vec![Some(100.0), Some(40.5)]);
        assert_eq!(series.points[1].category, json!("Feb"));
        assert_eq!(series.points[1].values, vec![Some(120.0), None]);
    }

    #[test]
    fn test_pie_chart_shapes() {
        let named = json!([{ "name": "EU", "value": 3 }, { "name": "US", "value": 5 }]);
        let WidgetData::PieChart { slices } = WidgetData::resolve(WidgetType::PieChart, &named).unwrap() else {
            panic!("expected pie chart");
        };
        assert_eq!(slices[1], PieSlice { name: "US".to_string(), value: Some(5.0) });

        let keyed = json!([{ "region": "EU", "total": "7" }]);
        let WidgetData::PieChart { slices } = WidgetData::resolve(WidgetType::PieChart, &keyed).unwrap() else {
            panic!("expected pie chart");
        };
        assert_eq!(slices, vec![PieSlice { name: "EU".to_string(), value: Some(7.0) }]);
    }

    #[test]
    fn test_number_and_text_take_first_value() {
        let data = json!([{ "total": 42, "other": 1 }]);
        assert_eq!(
            WidgetData::resolve(WidgetType::Number, &data).unwrap(),
            WidgetData::Number { value: Some(42.0) }
        );
        assert_eq!(
            WidgetData::resolve(WidgetType::Text, &data).unwrap(),
            WidgetData::Text { text: Some("42".to_string()) }
        );
        assert_eq!(
            WidgetData::resolve(WidgetType::Number, &json!("12.5")).unwrap(),
            WidgetData::Number { value: Some(12.5) }
        );
    }

    #[test]
    fn test_null_data_is_empty() {
        for kind in [WidgetType::Table, WidgetType::BarChart, WidgetType::Number, WidgetType::Text] {
            assert!(WidgetData::resolve(kind, &Value::Null).unwrap().is_empty());
        }
    }

    #[test]
    fn test_table_rejects_scalar_rows() {
        let err = WidgetData::resolve(WidgetType::Table, &json!([1, 2])).unwrap_err();
        assert_eq!(
            err,
            WidgetDataError::NotRows {
                kind: WidgetType::Table,
                found: "a number"
            }
        );
    }
}
