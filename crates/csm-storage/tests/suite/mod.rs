mod disk_repository;
