use spvd_storage::{Column, WriteBatch, WriteOp, COLUMN_COUNT};

#[test]
fn column_indexes_are_dense() {
    assert_eq!(Column::ALL.len(), COLUMN_COUNT);
    for (idx, column) in Column::ALL.iter().copied().enumerate() {
        assert_eq!(column.index(), idx, "{column:?}");
    }
}

#[test]
fn column_names_are_unique() {
    let mut names: Vec<&str> = Column::ALL.iter().map(|column| column.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), COLUMN_COUNT);
}

#[test]
fn batch_keeps_op_order() {
    let mut batch = WriteBatch::new();
    batch.put(Column::Utxo, [1u8; 34], b"value");
    batch.delete(Column::Stxo, b"gone".to_vec());
    assert_eq!(batch.len(), 2);

    let columns: Vec<Column> = batch.iter().map(WriteOp::column).collect();
    assert_eq!(columns, vec![Column::Utxo, Column::Stxo]);
    match batch.iter().next() {
        Some(WriteOp::Put { key, value, .. }) => {
            assert_eq!(key.as_slice(), &[1u8; 34]);
            assert_eq!(value.as_slice(), b"value");
        }
        other => panic!("unexpected op {other:?}"),
    }
}
