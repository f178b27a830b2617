use criterion::{black_box, criterion_group, criterion_main, Criterion};
use org_core::{Configuration, HtmlWriter, OrgWriter};

fn sample_document() -> String {
    let mut out = String::from("#+TITLE: Benchmark document\n\n");
    for section in 0..50 {
        out.push_str(&format!("* Section {section} :bench:\n"));
        out.push_str("Some text with *bold*, /italic/ and a [[https://example.com][link]].\n\n");
        out.push_str("** TODO [#B] Subsection\n");
        out.push_str("SCHEDULED: <2021-06-01 Tue>\n");
        out.push_str("- item one\n- item two\n  - nested item\n\n");
        out.push_str("| name | count |\n|------+-------|\n");
        for row in 0..5 {
            out.push_str(&format!("| row{row} | {row} |\n"));
        }
        out.push_str("#+TBLFM: @2$2=@1$2*2\n\n");
        out.push_str("#+BEGIN_SRC sh\necho benchmarking\n#+END_SRC\n\n");
    }
    out
}

fn bench_parse(c: &mut Criterion) {
    let cfg = Configuration::default().silent();
    let source = sample_document();
    c.bench_function("parse", |b| {
        b.iter(|| black_box(cfg.parse_str(black_box(&source), "bench.org")))
    });
}

fn bench_write_org(c: &mut Criterion) {
    let cfg = Configuration::default().silent();
    let doc = cfg.parse_str(&sample_document(), "bench.org");
    c.bench_function("write_org", |b| {
        b.iter(|| black_box(doc.write(&mut OrgWriter::new()).unwrap()))
    });
}

fn bench_write_html(c: &mut Criterion) {
    let cfg = Configuration::default().silent();
    let doc = cfg.parse_str(&sample_document(), "bench.org");
    c.bench_function("write_html", |b| {
        b.iter(|| black_box(doc.write(&mut HtmlWriter::new()).unwrap()))
    });
}

fn bench_roundtrip(c: &mut Criterion) {
    let cfg = Configuration::default().silent();
    let source = sample_document();
    c.bench_function("roundtrip", |b| {
        b.iter(|| {
            let doc = cfg.parse_str(black_box(&source), "bench.org");
            black_box(doc.write(&mut OrgWriter::new()).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_parse,
    bench_write_org,
    bench_write_html,
    bench_roundtrip
);
criterion_main!(benches);
