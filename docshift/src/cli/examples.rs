#[derive(Clone, Copy)]
pub struct ExampleGroup {
    pub title: &'static str,
    pub commands: &'static [&'static str],
}

#[derive(Clone, Copy)]
pub struct CommandExample {
    pub name: &'static str,
    pub groups: &'static [ExampleGroup],
}

const UP: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Apply Units",
        commands: &[
            "up                                   # Apply every pending unit",
            "up 2                                 # Apply the next two pending units",
            "up --to 20230301080000_split_codes   # Apply through one unit",
            "up --dry-run                         # Show what would run",
        ],
    },
];

const DOWN: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Revert Units",
        commands: &[
            "down                                 # Revert the most recent unit",
            "down 3                               # Revert the three most recent units",
            "down --to 20230112093000_rename_logo # Revert everything applied after a unit",
            "down --all                           # Revert every applied unit",
        ],
    },
];

const STATUS: &[ExampleGroup] = &[ExampleGroup {
    title: "Inspect State",
    commands: &[
        "status                               # Applied, pending and reverted units",
        "status --output json                 # Machine-readable status",
    ],
}];

const RESOLVE: &[ExampleGroup] = &[ExampleGroup {
    title: "Recovery",
    commands: &[
        "resolve 20230215140000_denormalize --applied      # Mark applied without running",
        "resolve 20230215140000_denormalize --rolled-back  # Mark rolled back without running",
    ],
}];

const CREATE: &[ExampleGroup] = &[ExampleGroup {
    title: "Scaffold",
    commands: &["create add_deal_expiry               # New unit file registered in units/mod.rs"],
}];

pub fn command_examples() -> &'static [CommandExample] {
    &[
        CommandExample { name: "up", groups: UP },
        CommandExample { name: "down", groups: DOWN },
        CommandExample {
            name: "status",
            groups: STATUS,
        },
        CommandExample {
            name: "resolve",
            groups: RESOLVE,
        },
        CommandExample {
            name: "create",
            groups: CREATE,
        },
    ]
}
