//! Painless accumulator templates for `scripted_metric` aggregations.

use crate::expr::quote;
use crate::request::ScriptedMetric;

/// Lambda comparing two tuples element by element. Nulls sort by the
/// direction sign; booleans come before numbers, numbers before strings;
/// values of the same type compare natively.
const COMPARE_TUPLE: &str = r#"(a, b)->{
    int i=0;
    for (dummy in a){
        if (a[i]==null){
            if (b[i]==null){
                return 0;
            }else{
                return -1*({{dir}});
            }
        }else if (b[i]==null) return {{dir}};

        if (a[i]!=b[i]) {
            if (a[i] instanceof Boolean){
                if (b[i] instanceof Boolean){
                    int cmp = Boolean.compare(a[i], b[i]);
                    if (cmp != 0) return cmp;
                } else {
                    return -1;
                }
            }else if (a[i] instanceof Number) {
                if (b[i] instanceof Boolean) {
                    return 1;
                } else if (b[i] instanceof Number) {
                    int cmp = Double.compare(a[i], b[i]);
                    if (cmp != 0) return cmp;
                } else {
                    return -1;
                }
            }else {
                if (b[i] instanceof Boolean) {
                    return 1;
                } else if (b[i] instanceof Number) {
                    return 1;
                } else {
                    int cmp = ((String)a[i]).compareTo((String)b[i]);
                    if (cmp != 0) return cmp;
                }
            }
        }
        i=i+1;
    }
    return 0;
}"#;

/// The better of two tuples under [`COMPARE_TUPLE`].
const BEST_OF_TUPLE: &str =
    "(Object[])Arrays.asList(new Object[]{{{expr1}}, {{expr2}}}).stream().{{op}}({{compare}}).get()";

/// Comparator with the direction substituted: `1` for max, `-1` for min.
pub fn compare_tuple(dir: i32) -> String {
    COMPARE_TUPLE.replace("{{dir}}", &dir.to_string())
}

fn best_of(expr1: &str, expr2: &str, dir: i32, op: &str) -> String {
    BEST_OF_TUPLE
        .replace("{{compare}}", &compare_tuple(dir))
        .replace("{{op}}", op)
        .replace("{{expr1}}", expr1)
        .replace("{{expr2}}", expr2)
}

/// Track the maximum (`dir = 1`) or minimum (`dir = -1`) tuple.
pub fn best_tuple(tuple: &str, nulls: &str, dir: i32) -> ScriptedMetric {
    let op = if dir > 0 { "max" } else { "min" };
    ScriptedMetric {
        init: format!("params._agg.best = {};", nulls),
        map: format!(
            "params._agg.best = {};",
            best_of("params._agg.best", tuple, dir, op)
        ),
        combine: "return params._agg.best".to_string(),
        reduce: format!(
            "return params._aggs.stream().{}({}).get()",
            op,
            compare_tuple(dir)
        ),
        params: None,
    }
}

/// Distinct values of a column.
pub fn union_of(es_column: &str) -> ScriptedMetric {
    ScriptedMetric {
        init: "params._agg.terms = new HashSet()".to_string(),
        map: format!(
            "for (v in doc[{}].values) params._agg.terms.add(v);",
            quote(es_column)
        ),
        combine: "return params._agg.terms.toArray()".to_string(),
        reduce: "HashSet output = new HashSet(); for (a in params._aggs) { if (a!=null) for (v in a) {output.add(v)} } return output.toArray()".to_string(),
        params: None,
    }
}

/// Number of times each value of a column occurs.
pub fn count_values_of(es_column: &str) -> ScriptedMetric {
    ScriptedMetric {
        init: "params._agg.terms = new HashMap()".to_string(),
        map: format!(
            "for (v in doc[{}].values) params._agg.terms.put(v, Optional.ofNullable(params._agg.terms.get(v)).orElse(0)+1);",
            quote(es_column)
        ),
        combine: "return params._agg.terms".to_string(),
        reduce: [
            "HashMap output = new HashMap();",
            "for (agg in params._aggs) {",
            "if (agg!=null){",
            "for (e in agg.entrySet()) {",
            "String key = String.valueOf(e.getKey());",
            "output.put(key, e.getValue() + Optional.ofNullable(output.get(key)).orElse(0));",
            "}",
            "}",
            "}",
            "return output;",
        ]
        .join(" "),
        params: Some(serde_json::json!({"_agg": {}})),
    }
}
