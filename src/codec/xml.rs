//! XML record codec.
//!
//! Reads and writes the `<records><record><Field>value</Field>...</record>
//! </records>` shape. Cell values go through the same scalar inference as
//! CSV so the three formats decode equivalently.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value;

use crate::error::Error;
use crate::record::Record;

use super::csv::infer_scalar;

pub(crate) fn decode(data: &[u8]) -> Result<Vec<Record>, Error> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<Record> = None;
    let mut field: Option<String> = None;
    let mut text: Option<String> = None;

    loop {
        match reader.read_event().map_err(|e| Error::Codec(e.to_string()))? {
            Event::Start(start) => {
                let name = local_name(&start);
                if current.is_none() {
                    if name == "record" {
                        current = Some(Record::new());
                    }
                    // "records" (or any other wrapper) just opens scope.
                } else {
                    field = Some(name);
                    text = None;
                }
            }
            Event::Empty(start) => {
                if let Some(record) = current.as_mut() {
                    record.insert(local_name(&start), Value::Null);
                }
            }
            Event::Text(t) => {
                let value = t
                    .unescape()
                    .map_err(|e| Error::Codec(e.to_string()))?
                    .into_owned();
                if field.is_some() {
                    text = Some(value);
                }
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.local_name().as_ref()).into_owned();
                if field.as_deref() == Some(name.as_str()) {
                    if let Some(record) = current.as_mut() {
                        let value = match text.take() {
                            Some(t) => infer_scalar(&t),
                            None => Value::Null,
                        };
                        record.insert(name, value);
                    }
                    field = None;
                } else if name == "record" {
                    if let Some(record) = current.take() {
                        records.push(record);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(records)
}

pub(crate) fn encode(records: &[Record]) -> Result<Vec<u8>, Error> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_event(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_event(&mut writer, Event::Start(BytesStart::new("records")))?;
    for record in records {
        write_event(&mut writer, Event::Start(BytesStart::new("record")))?;
        for (name, value) in record.iter() {
            match value {
                Value::Null => {
                    write_event(&mut writer, Event::Empty(BytesStart::new(name.as_str())))?;
                }
                other => {
                    let cell = match other {
                        Value::String(s) => s.clone(),
                        v => v.to_string(),
                    };
                    write_event(&mut writer, Event::Start(BytesStart::new(name.as_str())))?;
                    write_event(&mut writer, Event::Text(BytesText::new(&cell)))?;
                    write_event(&mut writer, Event::End(BytesEnd::new(name.as_str())))?;
                }
            }
        }
        write_event(&mut writer, Event::End(BytesEnd::new("record")))?;
    }
    write_event(&mut writer, Event::End(BytesEnd::new("records")))?;
    Ok(writer.into_inner())
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), Error> {
    writer
        .write_event(event)
        .map_err(|e| Error::Codec(e.to_string()))
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}
