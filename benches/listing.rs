use criterion::{black_box, criterion_group, criterion_main, Criterion};
use remote_transfer::core::{
    Attributes, Comparator, DirectoryListing, ExcludePatterns, ListFilter, Resource,
};

fn resources(count: usize) -> Vec<Resource> {
    (0..count)
        .map(|i| {
            let name = if i % 10 == 0 {
                format!("/dir/.hidden-{}", i)
            } else {
                format!("/dir/file-{}.txt", i)
            };
            Resource::file(&name).with_attributes(
                Attributes::default()
                    .with_size((i * 37 % 4096) as u64)
                    .with_modified(i as i64),
            )
        })
        .collect()
}

fn bench_listing(c: &mut Criterion) {
    let items = resources(10_000);

    c.bench_function("listing_put_10k", |b| {
        b.iter(|| {
            let mut listing = DirectoryListing::new(Vec::new());
            for resource in &items {
                listing.put(resource.clone());
            }
            black_box(listing.len())
        })
    });

    c.bench_function("listing_sort_by_size", |b| {
        let listing = DirectoryListing::new(items.clone());
        b.iter(|| {
            let mut listing = listing.clone();
            listing.sort(Comparator::Size { ascending: false });
            black_box(listing.len())
        })
    });

    c.bench_function("listing_filter_toggle", |b| {
        let mut listing = DirectoryListing::new(items.clone());
        b.iter(|| {
            listing.filter(Comparator::default(), ListFilter::HideDotfiles);
            black_box(listing.filter(Comparator::default(), ListFilter::All).len())
        })
    });

    c.bench_function("exclude_patterns_match", |b| {
        let patterns = ExcludePatterns::defaults();
        b.iter(|| {
            items
                .iter()
                .filter(|r| patterns.matches(black_box(r.path())))
                .count()
        })
    });
}

criterion_group!(benches, bench_listing);
criterion_main!(benches);
