pub mod hierarchy;
pub mod models;
pub mod storage;

pub use hierarchy::{HierarchyNode, build_hierarchy};
pub use models::{
    COMPANY_ID, DIVISION_ID, DataType, LoadMode, Row, TenantScope, decimal_value, row_decimal,
    row_text, tables,
};
pub use storage::{Filter, Query, RowStore, StoreError};
