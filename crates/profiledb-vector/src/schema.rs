use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

/// Arrow schema of one vector collection table: the point id, the
/// fixed-size embedding, a JSON payload snapshot, and a write stamp.
pub fn points_schema(dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dim as i32,
            ),
            true,
        ),
        Field::new("payload", DataType::Utf8, false),
        Field::new(
            "updated_at",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
    ]))
}
