//! Запись и чтение дампов: round-trip, прозрачность сжатия, пустой ввод.

use std::fs;

use jdump::{
    dump, get_count, load, Compression, DumpFile, DumpOptions, DumpResult, LoadOptions, Mode,
    Record,
};
use rstest::rstest;
use serde_json::json;
use tempfile::tempdir;

fn sample() -> Vec<Record> {
    vec![
        json!({"id": 1, "name": "alpha", "tags": ["x", "y"]}),
        json!({"id": 2, "name": "бета", "nested": {"z": null, "a": true}}),
        json!([1, 2.5, "three"]),
        json!("plain string with -- inside"),
        json!(42),
        json!(null),
    ]
}

fn overwrite() -> DumpOptions {
    DumpOptions {
        overwrite: true,
        ..Default::default()
    }
}

/// Тест проверяет, что `load(dump(records))` возвращает записи в исходном
/// порядке.
#[test]
fn test_dump_then_load_preserves_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("records.txt");
    let records = sample();

    let written = dump(&records, &path, &DumpOptions::default()).unwrap();
    assert_eq!(written, records.len() as u64);

    let loaded: Vec<Record> = load(&path, &LoadOptions::default())
        .unwrap()
        .collect::<DumpResult<_>>()
        .unwrap();
    assert_eq!(loaded, records);
}

/// Тест проверяет формат на диске: каждая запись занимает одну строку и
/// заканчивается разделителем.
#[test]
fn test_on_disk_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("layout.txt");

    dump(
        [json!({"b": 2, "a": 1}), json!([1, 2])],
        &path,
        &DumpOptions::default(),
    )
    .unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text, "{\"a\":1,\"b\":2}--\n[1,2]--\n");
}

/// Тест проверяет, что сжатие не влияет на прочитанные записи.
#[rstest]
#[case("f.txt", Compression::None)]
#[case("f.txt.gz", Compression::Gzip)]
#[case("f.gz", Compression::Gzip)]
#[case("f.txt.zst", Compression::Zstd)]
#[case("f.zstd", Compression::Zstd)]
fn test_compression_is_transparent(
    #[case] name: &str,
    #[case] expected: Compression,
) {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("baseline.txt");
    let path = dir.path().join(name);
    let records = sample();

    dump(&records, &plain, &overwrite()).unwrap();
    dump(&records, &path, &overwrite()).unwrap();

    let baseline: Vec<Record> = load(&plain, &LoadOptions::default())
        .unwrap()
        .collect::<DumpResult<_>>()
        .unwrap();
    let loaded: Vec<Record> = load(&path, &LoadOptions::default())
        .unwrap()
        .collect::<DumpResult<_>>()
        .unwrap();
    assert_eq!(loaded, baseline);

    let file = DumpFile::open(&path, Mode::Read).unwrap();
    assert_eq!(file.compression(), expected);
}

/// Тест проверяет, что формат определяется по содержимому, а не по имени.
#[test]
fn test_compression_sniffed_from_content() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("misnamed.txt");
    let opts = DumpOptions {
        compression: Some(Compression::Zstd),
        ..Default::default()
    };
    dump(sample(), &path, &opts).unwrap();

    assert_eq!(&fs::read(&path).unwrap()[..4], &[0x28, 0xb5, 0x2f, 0xfd]);
    assert_eq!(get_count(&path, &LoadOptions::default()).unwrap(), 6);
}

/// Тест проверяет, что дописанные gzip-сессии читаются одним потоком.
#[rstest]
#[case("appended.txt.gz")]
#[case("appended.txt.zst")]
fn test_append_sessions_read_as_one_stream(#[case] name: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join(name);
    // дозапись требует существующего файла; пустой файл сжимается по суффиксу
    fs::File::create(&path).unwrap();

    for i in 0..3 {
        let mut file = DumpFile::open(&path, Mode::Append).unwrap();
        file.write(&json!({"session": i})).unwrap();
        file.close().unwrap();
    }

    let loaded: Vec<Record> = load(&path, &LoadOptions::default())
        .unwrap()
        .collect::<DumpResult<_>>()
        .unwrap();
    assert_eq!(
        loaded,
        vec![json!({"session": 0}), json!({"session": 1}), json!({"session": 2})]
    );
}

/// Тест проверяет, что дозапись после последней строки без `\n` начинает
/// новую строку и не портит уже записанный кадр.
#[test]
fn test_append_after_unterminated_last_frame() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("unterminated.txt");
    fs::write(&path, "1--\n2--").unwrap();

    let mut file = DumpFile::open(&path, Mode::Append).unwrap();
    file.write(&json!(3)).unwrap();
    file.close().unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "1--\n2--\n3--\n");
    let loaded: Vec<Record> = load(&path, &LoadOptions::default())
        .unwrap()
        .collect::<DumpResult<_>>()
        .unwrap();
    assert_eq!(loaded, vec![json!(1), json!(2), json!(3)]);

    // завершённый файл дописывается без лишней пустой строки
    let mut file = DumpFile::open(&path, Mode::Append).unwrap();
    file.write(&json!(4)).unwrap();
    file.close().unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "1--\n2--\n3--\n4--\n");
}

/// Тест проверяет, что пустой дамп создаёт файл без записей.
#[rstest]
#[case("empty.txt")]
#[case("empty.txt.gz")]
#[case("empty.zst")]
fn test_empty_input(#[case] name: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join(name);

    let written = dump(Vec::<Record>::new(), &path, &DumpOptions::default()).unwrap();
    assert_eq!(written, 0);
    assert!(path.exists());

    let mut records = load(&path, &LoadOptions::default()).unwrap();
    assert!(records.read().unwrap().is_none());
    assert_eq!(get_count(&path, &LoadOptions::default()).unwrap(), 0);
}

/// Тест проверяет чтение однострочных записей, у которых разделитель стоит
/// на отдельной строке, а строки заканчиваются `\r\n`.
///
/// Записи, разбитые на несколько строк отступами, не поддерживаются.
#[test]
fn test_reads_separator_on_own_line_and_crlf() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("own-line.txt");
    fs::write(&path, "{\"a\":1}\r\n--\r\n\n{\"a\":2}--\r\n{\"a\":3}").unwrap();

    let loaded: Vec<Record> = load(&path, &LoadOptions::default())
        .unwrap()
        .collect::<DumpResult<_>>()
        .unwrap();
    assert_eq!(loaded, vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]);
}
