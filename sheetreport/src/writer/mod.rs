//! Serialization of rendered documents

pub mod csv_writer;
pub mod drawing;
pub mod worksheet;
pub mod xlsx_writer;

pub use csv_writer::write_csv;
pub use drawing::{AnchoredPicture, embed_pictures};
pub use worksheet::write_worksheet;
pub use xlsx_writer::{drop_calc_chain, rewrite_workbook_xml, write_xlsx};
