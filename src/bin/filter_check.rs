use lakeql::filter::{sql, FilterMode, FilterParser};

fn main() {
    let columns: Vec<String> = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ID,NAME,AMOUNT,CITY".to_string())
        .split(',')
        .map(|c| c.trim().to_string())
        .collect();
    let column_refs: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
    println!("columns: {}", columns.join(", "));

    let parser = match FilterParser::new(FilterMode::Filter) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error building filter grammar: {e}");
            std::process::exit(1);
        }
    };

    let mut state = sql::SqlFilterState::new();
    for line in std::io::stdin().lines() {
        let line = line.expect("a line");
        if line.trim().is_empty() {
            continue;
        }
        let now = std::time::Instant::now();
        let res = sql::compile(&parser, &line, &column_refs, &mut state);
        print!("[in {}μs] ", now.elapsed().as_micros());
        match res {
            Err(e) => println!("Error compiling filter: {e}"),
            Ok(()) => {
                println!("{}", state.sql);
                let mut params: Vec<_> = state.parameters.iter().collect();
                params.sort_by(|a, b| a.0.cmp(b.0));
                for (name, value) in params {
                    println!("  @{name} = {value:?}");
                }
            }
        }
    }
}
