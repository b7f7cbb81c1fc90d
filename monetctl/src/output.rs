use std::io::{self, Write};

use monet_model::FileRecord;
use serde::Serialize;
use serde_json::Value;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Records skip their id when serialized; put it back for display.
pub fn print_record(record: &FileRecord) -> anyhow::Result<()> {
    let mut value = serde_json::to_value(record)?;
    if let (Some(id), Value::Object(map)) = (record.id, &mut value) {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
    print_json(&value)
}
