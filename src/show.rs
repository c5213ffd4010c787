use ifd_layout::{IFD, Layout};

pub fn show_layout(layout: &Layout, verbose: bool) {
    if verbose {
        println!("{layout:#02x?}");
        println!();
    }
    print!("{layout}");
}

pub fn show_descriptor(ifd: &IFD, verbose: bool) {
    if verbose {
        println!("{ifd:#02x?}");
        println!();
    }
    print!("{ifd}");
}
