pub mod dates;
pub mod errors;
pub mod formats;
pub mod model;

pub use dates::{parse_date, parse_datetime};
pub use errors::ParserError;
pub use formats::{
    decode_latin1, normalize_column_name, read_delimited, read_json_records, split_lines,
    DelimitedFormat, DelimitedRows, FieldSpec,
};
pub use model::{Row, Value};

#[cfg(test)]
mod tests;
