// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Result rows to JSON, by column type name.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Row, TypeInfo, ValueRef};

pub(crate) fn decode_row(row: &PgRow) -> Vec<Value> {
	(0..row.len()).map(|idx| decode_column(row, idx)).collect()
}

fn decode_column(row: &PgRow, idx: usize) -> Value {
	let type_name = match row.try_get_raw(idx) {
		Ok(raw) if raw.is_null() => return Value::Null,
		Ok(raw) => raw.type_info().name().to_string(),
		Err(_) => return Value::Null,
	};

	let decoded = match type_name.as_str() {
		"BOOL" => row.try_get::<bool, _>(idx).map(Value::from),
		"INT2" => row.try_get::<i16, _>(idx).map(Value::from),
		"INT4" => row.try_get::<i32, _>(idx).map(Value::from),
		"INT8" => row.try_get::<i64, _>(idx).map(Value::from),
		"FLOAT4" => row.try_get::<f32, _>(idx).map(|v| Value::from(f64::from(v))),
		"FLOAT8" => row.try_get::<f64, _>(idx).map(Value::from),
		"JSON" | "JSONB" => row.try_get::<Value, _>(idx),
		"TIMESTAMPTZ" => row
			.try_get::<DateTime<Utc>, _>(idx)
			.map(|v| Value::from(v.to_rfc3339())),
		"TIMESTAMP" => row
			.try_get::<NaiveDateTime, _>(idx)
			.map(|v| Value::from(v.to_string())),
		"DATE" => row.try_get::<NaiveDate, _>(idx).map(|v| Value::from(v.to_string())),
		"TIME" => row.try_get::<NaiveTime, _>(idx).map(|v| Value::from(v.to_string())),
		"OID" => row
			.try_get::<sqlx::postgres::types::Oid, _>(idx)
			.map(|v| Value::from(v.0)),
		"TEXT[]" | "VARCHAR[]" | "NAME[]" => row.try_get::<Vec<String>, _>(idx).map(Value::from),
		"INT4[]" => row.try_get::<Vec<i32>, _>(idx).map(Value::from),
		"INT8[]" => row.try_get::<Vec<i64>, _>(idx).map(Value::from),
		_ => row.try_get::<String, _>(idx).map(Value::from),
	};

	decoded.unwrap_or_else(|_| Value::String(format!("<{}>", type_name.to_lowercase())))
}
