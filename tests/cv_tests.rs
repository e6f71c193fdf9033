use e57_foundation::{
    DestBuffer, DestValues, E57Reader, E57Writer, ErrorKind, FloatPrecision, NodeId, SourceBuffer,
    SourceValues,
};
use std::io::Cursor;

/// Creates a compressed vector with the prototype {x: Integer[0, 1023], y: Integer[-1, 1]}
/// and attaches it to the root as "points".
fn xy_compressed_vector(e57: &mut E57Writer<Cursor<&mut Vec<u8>>>) -> NodeId {
    let tree = e57.tree_mut();
    let proto = tree.new_structure();
    let x = tree.new_integer(0, 0, 1023).unwrap();
    tree.set(proto, "x", x).unwrap();
    let y = tree.new_integer(0, -1, 1).unwrap();
    tree.set(proto, "y", y).unwrap();
    let codecs = tree.new_vector(true);
    let cv = tree.new_compressed_vector(proto, codecs).unwrap();
    let root = tree.root();
    tree.set(root, "points", cv).unwrap();
    cv
}

#[test]
fn bitpacked_roundtrip() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let cv = xy_compressed_vector(&mut e57);

    let x_values = [0_i64, 512, 1023];
    let y_values = [-1_i64, 0, 1];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
    ];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    writer.write(&buffers, 3).unwrap();
    assert_eq!(writer.record_count(), 3);
    assert!(writer.is_open());
    writer.close().unwrap();
    assert!(!writer.is_open());
    e57.close().unwrap();

    let mut e57 = E57Reader::new(Cursor::new(file)).unwrap();
    let cv = e57.tree().get(e57.root(), "points").unwrap();
    assert_eq!(e57.tree().cv_record_count(cv).unwrap(), 3);

    let mut x_read = [0_i64; 8];
    let mut y_read = [0_i64; 8];
    let mut buffers = vec![
        DestBuffer::new("x", DestValues::I64(&mut x_read)),
        DestBuffer::new("y", DestValues::I64(&mut y_read)),
    ];
    let mut reader = e57.cv_reader(cv, &buffers).unwrap();
    assert_eq!(reader.read(&mut buffers).unwrap(), 3);
    assert_eq!(reader.read(&mut buffers).unwrap(), 0);
    reader.close().unwrap();
    drop(buffers);
    assert_eq!(&x_read[..3], &x_values);
    assert_eq!(&y_read[..3], &y_values);
}

#[test]
fn empty_compressed_vector() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let cv = xy_compressed_vector(&mut e57);

    let x_values: [i64; 0] = [];
    let y_values: [i64; 0] = [];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
    ];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    writer.close().unwrap();
    e57.close().unwrap();

    let mut e57 = E57Reader::new(Cursor::new(file)).unwrap();
    let cv = e57.tree().get(e57.root(), "points").unwrap();
    assert_eq!(e57.tree().cv_record_count(cv).unwrap(), 0);

    let mut x_read = [0_i64; 4];
    let mut y_read = [0_i64; 4];
    let mut buffers = vec![
        DestBuffer::new("x", DestValues::I64(&mut x_read)),
        DestBuffer::new("y", DestValues::I64(&mut y_read)),
    ];
    let mut reader = e57.cv_reader(cv, &buffers).unwrap();
    assert_eq!(reader.read(&mut buffers).unwrap(), 0);
    reader.close().unwrap();
}

#[test]
fn multi_packet_streaming() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();

    let tree = e57.tree_mut();
    let proto = tree.new_structure();
    let value = tree
        .new_float(0.0, FloatPrecision::Double, f64::MIN, f64::MAX)
        .unwrap();
    tree.set(proto, "value", value).unwrap();
    let codecs = tree.new_vector(true);
    let cv = tree.new_compressed_vector(proto, codecs).unwrap();
    let root = tree.root();
    tree.set(root, "samples", cv).unwrap();

    // Two batches of 10000 doubles need multiple data packets
    let batch: Vec<f64> = (0..10000).map(|i| i as f64 * 0.5).collect();
    let buffers = vec![SourceBuffer::new("value", SourceValues::F64(&batch))];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    writer.write(&buffers, 10000).unwrap();
    writer.write(&buffers, 10000).unwrap();
    writer.close().unwrap();
    e57.close().unwrap();

    let mut e57 = E57Reader::new(Cursor::new(file)).unwrap();
    let cv = e57.tree().get(e57.root(), "samples").unwrap();
    assert_eq!(e57.tree().cv_record_count(cv).unwrap(), 20000);

    // Read everything back in small chunks
    let mut chunk = [0.0_f64; 512];
    let mut reader = {
        let buffers = vec![DestBuffer::new("value", DestValues::F64(&mut chunk))];
        e57.cv_reader(cv, &buffers).unwrap()
    };
    let mut total = 0_usize;
    loop {
        let count = {
            let mut buffers = vec![DestBuffer::new("value", DestValues::F64(&mut chunk))];
            reader.read(&mut buffers).unwrap()
        };
        if count == 0 {
            break;
        }
        for (i, value) in chunk[..count].iter().enumerate() {
            let record = (total + i) % 10000;
            assert_eq!(*value, record as f64 * 0.5);
        }
        total += count;
    }
    assert_eq!(total, 20000);
    reader.close().unwrap();
}

#[test]
fn scaled_integer_conversion() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();

    let tree = e57.tree_mut();
    let proto = tree.new_structure();
    let field = tree.new_scaled_integer(0, 0, 1000, 0.01, 5.0).unwrap();
    tree.set(proto, "distance", field).unwrap();
    let codecs = tree.new_vector(true);
    let cv = tree.new_compressed_vector(proto, codecs).unwrap();
    let root = tree.root();
    tree.set(root, "scan", cv).unwrap();

    let distances = [6.0_f64, 5.5, 5.0];
    let mut buffer = SourceBuffer::new("distance", SourceValues::F64(&distances));
    buffer.do_scaling = true;
    let buffers = vec![buffer];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    writer.write(&buffers, 3).unwrap();
    writer.close().unwrap();
    e57.close().unwrap();

    let mut e57 = E57Reader::new(Cursor::new(file)).unwrap();
    let cv = e57.tree().get(e57.root(), "scan").unwrap();

    // Scaled read yields the original values
    let mut scaled = [0.0_f64; 3];
    let mut buffer = DestBuffer::new("distance", DestValues::F64(&mut scaled));
    buffer.do_scaling = true;
    let mut buffers = vec![buffer];
    let mut reader = e57.cv_reader(cv, &buffers).unwrap();
    assert_eq!(reader.read(&mut buffers).unwrap(), 3);
    reader.close().unwrap();
    drop(buffers);
    assert_eq!(scaled, [6.0, 5.5, 5.0]);

    // Raw read yields the stored integers
    let mut raw = [0_i64; 3];
    let mut buffers = vec![DestBuffer::new("distance", DestValues::I64(&mut raw))];
    let mut reader = e57.cv_reader(cv, &buffers).unwrap();
    assert_eq!(reader.read(&mut buffers).unwrap(), 3);
    reader.close().unwrap();
    drop(buffers);
    assert_eq!(raw, [100, 50, 0]);
}

#[test]
fn value_out_of_bounds_is_rejected() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let cv = xy_compressed_vector(&mut e57);

    let x_values = [1024_i64];
    let y_values = [0_i64];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
    ];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    let err = writer.write(&buffers, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueOutOfBounds);
}

#[test]
fn buffer_validation_errors() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let cv = xy_compressed_vector(&mut e57);

    let x_values = [0_i64; 4];
    let y_values = [0_i64; 4];

    // Missing buffer for y
    let buffers = vec![SourceBuffer::new("x", SourceValues::I64(&x_values))];
    let err = e57.cv_writer(cv, &buffers).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoBufferForElement);

    // Duplicate path
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
    ];
    let err = e57.cv_writer(cv, &buffers).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BufferDuplicatePathname);

    // Unknown path
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
        SourceBuffer::new("z", SourceValues::I64(&y_values)),
    ];
    let err = e57.cv_writer(cv, &buffers).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathUndefined);

    // Capacity mismatch
    let shorter = [0_i64; 2];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&shorter)),
    ];
    let err = e57.cv_writer(cv, &buffers).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BufferSizeMismatch);

    // Float buffer for an integer field without conversion
    let floats = [0.0_f64; 4];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::F64(&floats)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
    ];
    let err = e57.cv_writer(cv, &buffers).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConversionRequired);
}

#[test]
fn incompatible_buffers_between_calls() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let cv = xy_compressed_vector(&mut e57);

    let x_values = [0_i64; 4];
    let y_values = [0_i64; 4];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
    ];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();

    let shorter = [0_i64; 2];
    let other = vec![
        SourceBuffer::new("x", SourceValues::I64(&shorter)),
        SourceBuffer::new("y", SourceValues::I64(&shorter)),
    ];
    let err = writer.write(&other, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BuffersNotCompatible);
}

#[test]
fn writer_lifecycle_errors() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let cv = xy_compressed_vector(&mut e57);

    let x_values = [0_i64; 1];
    let y_values = [0_i64; 1];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
    ];

    // A dropped writer keeps its slot, closing the file reports it
    let writer = e57.cv_writer(cv, &buffers).unwrap();
    drop(writer);
    let err = e57.cv_writer(cv, &buffers).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooManyWriters);
    let err = e57.close().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[test]
fn closed_writer_rejects_writes() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let cv = xy_compressed_vector(&mut e57);

    let x_values = [0_i64; 1];
    let y_values = [0_i64; 1];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
    ];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    writer.close().unwrap();
    let err = writer.write(&buffers, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriterNotOpen);
    let err = writer.close().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriterNotOpen);
}

#[test]
fn unattached_vector_cannot_be_written() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let tree = e57.tree_mut();
    let proto = tree.new_structure();
    let x = tree.new_integer(0, 0, 7).unwrap();
    tree.set(proto, "x", x).unwrap();
    let codecs = tree.new_vector(true);
    let cv = tree.new_compressed_vector(proto, codecs).unwrap();

    let x_values = [0_i64; 1];
    let buffers = vec![SourceBuffer::new("x", SourceValues::I64(&x_values))];
    let err = e57.cv_writer(cv, &buffers).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NodeUnattached);
}

#[test]
fn reader_seek_is_not_implemented() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let cv = xy_compressed_vector(&mut e57);

    let x_values = [1_i64];
    let y_values = [0_i64];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
    ];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    writer.write(&buffers, 1).unwrap();
    writer.close().unwrap();
    e57.close().unwrap();

    let mut e57 = E57Reader::new(Cursor::new(file)).unwrap();
    let cv = e57.tree().get(e57.root(), "points").unwrap();
    let mut x_read = [0_i64; 1];
    let mut y_read = [0_i64; 1];
    let mut buffers = vec![
        DestBuffer::new("x", DestValues::I64(&mut x_read)),
        DestBuffer::new("y", DestValues::I64(&mut y_read)),
    ];
    let mut reader = e57.cv_reader(cv, &buffers).unwrap();
    let err = reader.seek(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert_eq!(reader.read(&mut buffers).unwrap(), 1);
    reader.close().unwrap();
    let err = reader.read(&mut buffers).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReaderNotOpen);
}

#[test]
fn sealed_prototype_rejects_changes() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let cv = xy_compressed_vector(&mut e57);
    let proto = e57.tree().cv_prototype(cv).unwrap();

    let x_values = [0_i64; 1];
    let y_values = [0_i64; 1];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
    ];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    writer.close().unwrap();

    let extra = e57.tree_mut().new_integer(0, 0, 1).unwrap();
    let err = e57.tree_mut().set(proto, "extra", extra).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadPrototype);
}

#[test]
fn zero_bit_fields() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();

    let tree = e57.tree_mut();
    let proto = tree.new_structure();
    let constant = tree.new_integer(7, 7, 7).unwrap();
    tree.set(proto, "constant", constant).unwrap();
    let varying = tree.new_integer(0, 0, 3).unwrap();
    tree.set(proto, "varying", varying).unwrap();
    let codecs = tree.new_vector(true);
    let cv = tree.new_compressed_vector(proto, codecs).unwrap();
    let root = tree.root();
    tree.set(root, "data", cv).unwrap();

    let constants = [7_i64; 5];
    let varyings = [0_i64, 1, 2, 3, 0];
    let buffers = vec![
        SourceBuffer::new("constant", SourceValues::I64(&constants)),
        SourceBuffer::new("varying", SourceValues::I64(&varyings)),
    ];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    writer.write(&buffers, 5).unwrap();
    writer.close().unwrap();
    e57.close().unwrap();

    let mut e57 = E57Reader::new(Cursor::new(file)).unwrap();
    let cv = e57.tree().get(e57.root(), "data").unwrap();
    let mut constants_read = [0_i64; 5];
    let mut varyings_read = [0_i64; 5];
    let mut buffers = vec![
        DestBuffer::new("constant", DestValues::I64(&mut constants_read)),
        DestBuffer::new("varying", DestValues::I64(&mut varyings_read)),
    ];
    let mut reader = e57.cv_reader(cv, &buffers).unwrap();
    assert_eq!(reader.read(&mut buffers).unwrap(), 5);
    reader.close().unwrap();
    drop(buffers);
    assert_eq!(constants_read, [7; 5]);
    assert_eq!(varyings_read, varyings);
}

#[test]
fn nested_prototype_fields() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();

    let tree = e57.tree_mut();
    let proto = tree.new_structure();
    let x = tree.new_integer(0, 0, 255).unwrap();
    tree.set_create_path(proto, "position/x", x).unwrap();
    let y = tree.new_integer(0, 0, 255).unwrap();
    tree.set_create_path(proto, "position/y", y).unwrap();
    let codecs = tree.new_vector(true);
    let cv = tree.new_compressed_vector(proto, codecs).unwrap();
    let root = tree.root();
    tree.set(root, "pixels", cv).unwrap();

    let x_values = [10_i64, 20];
    let y_values = [30_i64, 40];
    let buffers = vec![
        SourceBuffer::new("position/x", SourceValues::I64(&x_values)),
        SourceBuffer::new("position/y", SourceValues::I64(&y_values)),
    ];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    writer.write(&buffers, 2).unwrap();
    writer.close().unwrap();
    e57.close().unwrap();

    let mut e57 = E57Reader::new(Cursor::new(file)).unwrap();
    let cv = e57.tree().get(e57.root(), "pixels").unwrap();
    let mut x_read = [0_i64; 2];
    let mut y_read = [0_i64; 2];
    let mut buffers = vec![
        DestBuffer::new("position/x", DestValues::I64(&mut x_read)),
        DestBuffer::new("position/y", DestValues::I64(&mut y_read)),
    ];
    let mut reader = e57.cv_reader(cv, &buffers).unwrap();
    assert_eq!(reader.read(&mut buffers).unwrap(), 2);
    reader.close().unwrap();
    drop(buffers);
    assert_eq!(x_read, [10, 20]);
    assert_eq!(y_read, [30, 40]);
}

#[test]
fn converted_read_into_narrow_types() {
    let mut file = Vec::new();
    let mut e57 = E57Writer::new(Cursor::new(&mut file)).unwrap();
    let cv = xy_compressed_vector(&mut e57);

    let x_values = [100_i64, 200];
    let y_values = [1_i64, -1];
    let buffers = vec![
        SourceBuffer::new("x", SourceValues::I64(&x_values)),
        SourceBuffer::new("y", SourceValues::I64(&y_values)),
    ];
    let mut writer = e57.cv_writer(cv, &buffers).unwrap();
    writer.write(&buffers, 2).unwrap();
    writer.close().unwrap();
    e57.close().unwrap();

    let mut e57 = E57Reader::new(Cursor::new(file)).unwrap();
    let cv = e57.tree().get(e57.root(), "points").unwrap();

    // Narrow integer destination and converted float destination
    let mut x_read = [0_u16; 2];
    let mut y_read = [0.0_f32; 2];
    let mut y_buffer = DestBuffer::new("y", DestValues::F32(&mut y_read));
    y_buffer.do_conversion = true;
    let mut buffers = vec![
        DestBuffer::new("x", DestValues::U16(&mut x_read)),
        y_buffer,
    ];
    let mut reader = e57.cv_reader(cv, &buffers).unwrap();
    assert_eq!(reader.read(&mut buffers).unwrap(), 2);
    reader.close().unwrap();
    drop(buffers);
    assert_eq!(x_read, [100, 200]);
    assert_eq!(y_read, [1.0, -1.0]);
}
