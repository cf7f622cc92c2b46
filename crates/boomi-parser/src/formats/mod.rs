mod delimited;
mod records;
mod text;

pub use delimited::{read_delimited, DelimitedFormat, DelimitedRows, FieldSpec};
pub use records::read_json_records;
pub use text::{decode_latin1, normalize_column_name, split_lines};
