use fex::{DataType, Input};

fn main() {
    let variables = [
        ("x", DataType::Float),
        ("n", DataType::Int),
        ("flag", DataType::Bool),
        ("v", DataType::Vec3),
    ];
    let inputs = [
        Input::Float(&[2.0]),
        Input::Int(&[3]),
        Input::Bool(&[true]),
        Input::Vec3(&[[1.0, 2.0, 3.0]]),
    ];

    for line in std::io::stdin().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if let Err(e) = eval(&line, &variables, &inputs) {
            println!("error: {}", e);
        }
    }
}

fn eval(mut src: &str, variables: &[(&str, DataType)], inputs: &[Input]) -> fex::Result<()> {
    let disassemble = if src.ends_with("#disassemble") {
        src = src.trim_end_matches("#disassemble");
        true
    } else {
        false
    };

    let program = fex::compile(src, variables, DataType::Float)?;
    if disassemble {
        print!("{}", program.dump());
    }

    println!("= {}", program.eval(inputs, 0));
    Ok(())
}
