use crate::set::{CompositeTag, Set, SetId};
use crate::tag::TagStore;

#[test]
fn compile_partitions_singles() {
    let mut store = TagStore::new();
    let n = store.intern("n");
    let re = store.intern("\"ca.*\"r");
    let mut set = Set::new(SetId(0), "N_OR_CA");
    set.single_tags.insert(n);
    set.single_tags.insert(re);
    set.compile(&store);

    assert!(set.single_tags.contains(&n));
    assert!(!set.single_tags.contains(&re));
    assert_eq!(set.single_special, vec![re]);
    assert!(set.has_special);
    assert!(!set.matches_any);
}

#[test]
fn compile_indexes_composites_by_plain_member() {
    let mut store = TagStore::new();
    let n = store.intern("n");
    let sg = store.intern("sg");
    let re = store.intern("\"x.*\"r");
    let mut set = Set::new(SetId(0), "COMP");
    set.composites.push(CompositeTag::new([n, sg]));
    set.composites.push(CompositeTag::new([re]));
    set.compile(&store);

    let keyed: usize = set.composite_index.values().map(|v| v.len()).sum();
    assert_eq!(keyed, 1);
    assert_eq!(set.composite_rest, vec![1]);
    assert!(set.has_special);
}

#[test]
fn any_tag_marks_set() {
    let mut store = TagStore::new();
    let any = store.intern("*");
    let mut set = Set::new(SetId(0), "ANY");
    set.single_tags.insert(any);
    set.compile(&store);
    assert!(set.matches_any);
}
