use pagefold::{
    classify::{Classification, PageClassifier, UnitPattern},
    config::Config,
};

fn classifier() -> PageClassifier {
    PageClassifier::new(&Config::default()).expect("classifier")
}

#[test]
fn unit_heading_starts_a_unit() {
    let c = classifier();
    let class = c.classify("Contest banner\n## Problem A. Widgets\nDescription");
    assert!(class.is_unit_start);

    let lower = c.classify("## problem k. lowercase heading");
    assert!(lower.is_unit_start);
}

#[test]
fn near_miss_headings_do_not_start_units() {
    let c = classifier();
    for text in [
        "Problem A. Widgets",
        "# Problem A. Widgets",
        "## Problem A Widgets",
        "Intro text ## Problem A. Widgets",
        "### Problem A. Widgets",
        "## Round 3 Contest",
        "Format reminder:\n    ## Problem X. Quoted",
        "  ## Problem B. Indented",
    ] {
        assert!(!c.classify(text).is_unit_start, "{text:?}");
    }
}

#[test]
fn title_comes_from_first_heading_line() {
    let pat = UnitPattern::new("Problem").unwrap();
    let text = "header\n## Problem B. Gadgets  \nbody\n## Problem C. Other";
    assert_eq!(pat.title(text).as_deref(), Some("## Problem B. Gadgets"));
    let indented = "header\n    ## Problem X. Quoted\n## Problem C. Other";
    assert_eq!(pat.title(indented).as_deref(), Some("## Problem C. Other"));
    assert_eq!(pat.title("no heading here"), None);
}

#[test]
fn unit_keyword_is_configurable() {
    let mut cfg = Config::default();
    cfg.classifier.unit_keyword = "Task".into();
    let c = PageClassifier::new(&cfg).unwrap();
    assert!(c.classify("## Task 3. Sorting").is_unit_start);
    assert!(!c.classify("## Problem A. Widgets").is_unit_start);
}

#[test]
fn sample_keywords_mark_data_samples() {
    let c = classifier();
    assert!(c.classify("Sample Input:\n1 2\nSample Output:\n3").has_data_sample);
    assert!(c.classify("**Input:**\n5").has_data_sample);
    assert!(c.classify("Read the following\nOutput\nprint it").has_data_sample);
    assert!(c.classify("样例输入\n1 2").has_data_sample);
}

#[test]
fn structural_signals_mark_data_samples() {
    let c = classifier();
    let table = "Some words\n| a | b |\nmore words";
    assert_eq!(c.matched_signals(table), vec!["table_row"]);

    let fenced = "prose\n```\n1 2 3\n```\nprose";
    assert!(c.matched_signals(fenced).contains(&"fenced_block"));

    let stacked = "The answer is\n42\n17\nas shown";
    assert!(c.matched_signals(stacked).contains(&"stacked_numbers"));
}

#[test]
fn plain_prose_has_no_signals() {
    let c = classifier();
    let class = c.classify("Alice has a garden.\nShe plants flowers every spring.");
    assert_eq!(class, Classification::default());
}

#[test]
fn short_numeric_page_is_likely_data() {
    let c = classifier();
    assert!(c.is_likely_data_page("3\n1 2 3\n4 5 6\nthe end"));
    assert!(!c.is_likely_data_page("3\nsome text\nmore text\nand more"));
    // A single matching line is never enough.
    assert!(!c.is_likely_data_page("42"));
}

#[test]
fn long_pages_are_never_data_pages() {
    let c = classifier();
    let text = (1..=11).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
    assert!(!c.is_likely_data_page(&text));

    let ten = (1..=10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n\n");
    assert!(c.is_likely_data_page(&ten));
}

#[test]
fn blank_input_yields_no_flags() {
    let c = classifier();
    assert_eq!(c.classify(""), Classification::default());
    assert_eq!(c.classify("  \n\t\n"), Classification::default());
}

#[test]
fn classification_is_deterministic() {
    let c = classifier();
    let text = "## Problem A. X\nSample Input\n1\n2";
    assert_eq!(c.classify(text), c.classify(text));
}
