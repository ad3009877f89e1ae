pub mod frontend;
pub mod pipeline;

/// Synthetic module with `functions` methods mixing loops, strings and tables
pub fn sample_program(functions: usize) -> String {
    let mut source = String::from("local Shop = {}\nShop.__index = Shop\n");
    for i in 0..functions {
        source.push_str(&format!(
            "function Shop:offer_{i}(price, qty)\n  \
             local label = \"offer {i}\"\n  \
             local total = 0\n  \
             for k = 1, qty do total = total + price * k end\n  \
             if total > {limit} then label = label .. ' (bulk)' end\n  \
             return {{ label = label, total = total }}\n\
             end\n",
            limit = i * 10
        ));
    }
    source.push_str("return Shop\n");
    source
}
